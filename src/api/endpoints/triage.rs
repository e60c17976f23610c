//! Intake endpoint used by channel gateways and the web form.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::dispatch::SubmitResult;
use crate::models::SubmissionRequest;

/// `POST /api/triage`: classify a submission and create its encounter.
pub async fn submit(
    State(ctx): State<ApiContext>,
    body: Result<Json<SubmissionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResult>), ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = ctx.service.submit_triage(request)?;
    Ok((StatusCode::CREATED, Json(result)))
}
