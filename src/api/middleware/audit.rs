//! Audit logging middleware.
//!
//! Logs every API request with provider, method, path and response status.
//! Runs innermost so the provider context set by auth is visible.

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::ProviderContext;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let provider_id = req
        .extensions()
        .get::<ProviderContext>()
        .map(|p| p.provider_id.to_string())
        .unwrap_or_else(|| "gateway".to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if response.status().is_server_error() {
        tracing::error!(%provider_id, %method, %path, status, elapsed_ms, "API request");
    } else {
        tracing::info!(%provider_id, %method, %path, status, elapsed_ms, "API request");
    }
    response
}
