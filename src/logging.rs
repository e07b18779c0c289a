// src/logging.rs
// Standalone-use tracing bootstrap (§ AMBIENT STACK DETAIL). The library
// itself never calls this — the embedding gateway owns process bootstrap —
// but examples and integration tests need something to call, the way the
// teacher's bin crates wire up `tracing_subscriber::fmt`.

use tracing_subscriber::EnvFilter;

/// Initialize a process-wide `tracing` subscriber from `RUST_LOG`
/// (defaulting to `info`). Safe to call more than once; later calls are a
/// no-op once a global subscriber is set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
