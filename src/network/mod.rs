//! HTTP surface for Request Jar
//!
//! Routes the jar API and capture URLs onto [`JarService`](crate::service::JarService)
//! and streams live captures as server-sent events.

mod cors;
mod handler;
mod http;
mod limit;
mod router;
mod sse;

pub use cors::{CorsPolicy, ALLOWED_METHODS};
pub use handler::Server;
pub use http::{canonical_header_name, header_map, query_map, ResponseBody};
pub use limit::ConnectionLimit;
pub use router::{Route, Router, GREETING};
pub use sse::{encode_event, event_stream, CONNECTED_EVENT, KEEPALIVE_COMMENT};

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
