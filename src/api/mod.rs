//! HTTP surface of the dispatch engine.
//!
//! Axum router, middleware, endpoint handlers and server lifecycle.

pub mod endpoints;
pub mod error;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;

pub use router::dispatch_api_router;
pub use server::{start_api_server_on, ApiServer, ApiSession};
