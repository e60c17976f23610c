//! Callback queue endpoints.
//!
//! Reads:
//! - `GET /api/callbacks?status=&priority=`: queue in dispatch order
//! - `GET /api/callbacks/next`: head of the queue
//! - `GET /api/callbacks/:id`: detail
//!
//! Actions:
//! - `POST /api/callbacks/:id/assign`
//! - `POST /api/callbacks/claim`: claim the head of the queue
//! - `POST /api/callbacks/:id/complete`
//! - `POST /api/callbacks/:id/release`: admin only

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{parse_id, parse_query, ApiContext, ProviderContext};
use crate::dispatch::parse_priority;
use crate::models::enums::CompletionKind;
use crate::models::{Callback, CallbackFilter, CallbackView, Completion};

#[derive(Deserialize)]
pub struct CallbackListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Serialize)]
pub struct NextResponse {
    pub callback: Option<CallbackView>,
}

#[derive(Serialize)]
pub struct ClaimResponse {
    pub callback: Option<Callback>,
}

/// Completion body. A missing outcome is reported as `MISSING_OUTCOME`
/// rather than as a malformed body.
#[derive(Deserialize)]
pub struct CompleteRequest {
    pub outcome: Option<String>,
    pub notes: Option<String>,
    pub kind: Option<CompletionKind>,
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
    Query(query): Query<CallbackListQuery>,
) -> Result<Json<Vec<CallbackView>>, ApiError> {
    let priority = match query.priority.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => Some(parse_priority(raw)?),
        _ => None,
    };
    let filter = CallbackFilter {
        status: parse_query("status", query.status.as_deref())?,
        priority,
    };
    Ok(Json(ctx.service.list_callbacks(filter)?))
}

pub async fn next(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
) -> Result<Json<NextResponse>, ApiError> {
    Ok(Json(NextResponse {
        callback: ctx.service.next_callback()?,
    }))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
    Path(id): Path<String>,
) -> Result<Json<CallbackView>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.service.get_callback(&id)?))
}

pub async fn assign(
    State(ctx): State<ApiContext>,
    Extension(provider): Extension<ProviderContext>,
    Path(id): Path<String>,
) -> Result<Json<Callback>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.service.assign_callback(&id, &provider)?))
}

pub async fn claim(
    State(ctx): State<ApiContext>,
    Extension(provider): Extension<ProviderContext>,
) -> Result<Json<ClaimResponse>, ApiError> {
    Ok(Json(ClaimResponse {
        callback: ctx.service.claim_next_callback(&provider)?,
    }))
}

pub async fn complete(
    State(ctx): State<ApiContext>,
    Extension(provider): Extension<ProviderContext>,
    Path(id): Path<String>,
    body: Result<Json<CompleteRequest>, JsonRejection>,
) -> Result<Json<Callback>, ApiError> {
    let id = parse_id(&id)?;
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let completion = Completion {
        outcome: body.outcome.unwrap_or_default(),
        notes: body.notes,
        kind: body.kind.unwrap_or(CompletionKind::Reached),
    };
    Ok(Json(ctx.service.complete_callback(&id, &provider, completion)?))
}

pub async fn release(
    State(ctx): State<ApiContext>,
    Extension(provider): Extension<ProviderContext>,
    Path(id): Path<String>,
) -> Result<Json<Callback>, ApiError> {
    if !provider.is_admin() {
        return Err(ApiError::Forbidden(
            "Releasing a callback requires the admin role".into(),
        ));
    }
    let id = parse_id(&id)?;
    Ok(Json(ctx.service.release_callback(&id)?))
}
