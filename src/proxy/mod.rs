//! HTTP relay module.
//!
//! Accepts upstream-shaped generation requests, forwards them with the
//! resolved credential and relays the answer, re-framing streams as SSE.

mod handlers;
pub mod route;
mod server;
pub mod stream;
pub mod upstream;

pub use route::{classify, GenerationRoute, Operation};
pub use server::{create_router, run_server, AppState, MAX_BODY_BYTES};
pub use stream::{relay_passthrough, relay_sse, sse_frame, SseDecoder};
pub use upstream::UpstreamClient;
