//! HTTP API surface: request/response types, response helpers, the router,
//! and per-area handler modules.

pub(crate) mod handlers;
pub(crate) mod respond;
mod router;
mod types;

pub use router::dispatch;
pub use types::{ApiRequest, ApiResponse, AppState};
