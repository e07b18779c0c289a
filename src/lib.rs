// src/lib.rs
// Upstream integration core for a CodeWhisperer/Kiro-style assistant proxy:
// frame decoding, token estimation, model mapping, identity derivation,
// credential caching, request translation, and stream assembly.
//
// Module layout mirrors the teacher's flat `src/` with one file per
// concern, grouped loosely by pipeline stage (inbound identity/translation,
// upstream transport/credentials, outbound frame/stream assembly).

pub mod adapter;
pub mod cancellation;
pub mod client_types;
pub mod config;
pub mod error;
pub mod frame;
pub mod identity;
pub mod logging;
pub mod model_map;
pub mod sink;
pub mod stream;
pub mod token_cache;
pub mod tokens;
pub mod translate;
pub mod transport;
pub mod upstream_types;

pub use adapter::{Adapter, ExecuteOutcome, RequestContext};
pub use config::{AuthMethod, ModelMapRule, ProviderConfig};
pub use error::{CoreError, CoreResult};
pub use sink::ResponseSink;
pub use transport::{ReqwestTransport, UpstreamTransport};
