//! Provider administration endpoints.
//!
//! - `POST /api/providers/:id/release`: return every callback the provider
//!   holds to the queue (admin only, e.g. when a nurse goes off shift)

use axum::extract::{Path, State};
use axum::{Extension, Json};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ProviderContext};
use crate::models::{Callback, ProviderId};

pub async fn release(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<ProviderContext>,
    Path(provider_id): Path<String>,
) -> Result<Json<Vec<Callback>>, ApiError> {
    if !caller.is_admin() {
        return Err(ApiError::Forbidden(
            "Releasing a provider's callbacks requires the admin role".into(),
        ));
    }
    let provider_id = provider_id.trim();
    if provider_id.is_empty() {
        return Err(ApiError::BadRequest("Provider id must not be empty".into()));
    }
    let released = ctx.service.release_provider(&ProviderId::new(provider_id))?;
    tracing::info!(
        admin = %caller.provider_id,
        provider = provider_id,
        released = released.len(),
        "Provider callbacks released"
    );
    Ok(Json(released))
}
