//! Provider identity middleware.
//!
//! Authentication happens upstream; this layer trusts the identity headers
//! it forwards and injects a `ProviderContext` for downstream handlers.

use std::str::FromStr;

use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::{ProviderContext, PROVIDER_ID_HEADER, PROVIDER_ROLE_HEADER};
use crate::models::enums::ProviderRole;

/// Require provider identity headers.
pub async fn require_provider(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let provider = match provider_from_headers(req.headers()) {
        Ok(p) => p,
        Err(err) => return err.into_response(),
    };
    req.extensions_mut().insert(provider);
    next.run(req).await
}

fn provider_from_headers(headers: &HeaderMap) -> Result<ProviderContext, ApiError> {
    let provider_id = headers
        .get(PROVIDER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized)?;

    let role = match headers.get(PROVIDER_ROLE_HEADER) {
        Some(raw) => {
            let raw = raw.to_str().map_err(|_| ApiError::Unauthorized)?;
            ProviderRole::from_str(&raw.trim().to_ascii_lowercase())
                .map_err(|_| ApiError::Forbidden(format!("Unknown provider role: {raw}")))?
        }
        None => ProviderRole::Nurse,
    };

    Ok(ProviderContext::new(provider_id, role))
}
