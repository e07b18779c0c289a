// src/cancellation.rs
// Client-cancellation signal (§5 "Cancellation", §4.H step 7).
//
// The enclosing HTTP framework owns the actual disconnect detection; this
// is just the handle the adapter selects on while streaming. Re-exports the
// teacher's own cancellation primitive, `tokio_util::sync::CancellationToken`
// (used throughout its operation engine and websocket layer, e.g.
// `operations/engine/mod.rs`, `api/ws/operations/mod.rs`), rather than
// hand-rolling an atomic-bool-plus-`Notify` pair that would also have to
// reimplement tokio's own missed-wakeup handling.

pub use tokio_util::sync::CancellationToken;
