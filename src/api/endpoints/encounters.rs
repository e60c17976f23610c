//! Encounter endpoints.
//!
//! - `GET /api/encounters`: list with status/channel filters and paging
//! - `GET /api/encounters/:id`: detail
//! - `PATCH /api/encounters/:id`: provider edit
//! - `POST /api/encounters/:id/callback`: request a callback

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::{parse_id, parse_query, ApiContext, ProviderContext};
use crate::dispatch::CallbackRequest;
use crate::models::{Callback, Encounter, EncounterFilter, EncounterUpdate};

#[derive(Deserialize)]
pub struct EncounterListQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
    Query(query): Query<EncounterListQuery>,
) -> Result<Json<Vec<Encounter>>, ApiError> {
    let filter = EncounterFilter {
        status: parse_query("status", query.status.as_deref())?,
        channel: parse_query("channel", query.channel.as_deref())?,
        skip: query.skip,
        limit: query.limit,
    };
    Ok(Json(ctx.service.list_encounters(&filter)?))
}

pub async fn detail(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
    Path(id): Path<String>,
) -> Result<Json<Encounter>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(ctx.service.get_encounter(&id)?))
}

pub async fn update(
    State(ctx): State<ApiContext>,
    Extension(provider): Extension<ProviderContext>,
    Path(id): Path<String>,
    body: Result<Json<EncounterUpdate>, JsonRejection>,
) -> Result<Json<Encounter>, ApiError> {
    let id = parse_id(&id)?;
    let Json(update) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(ctx.service.update_encounter(&id, &provider, update)?))
}

/// Body is optional; an empty request reuses the number captured at intake.
/// A non-empty body must be a valid JSON `CallbackRequest`.
pub async fn request_callback(
    State(ctx): State<ApiContext>,
    Extension(_provider): Extension<ProviderContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Callback>), ApiError> {
    let id = parse_id(&id)?;
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CallbackRequest::default()
    } else {
        if !has_json_content_type(&headers) {
            return Err(ApiError::BadRequest(
                "Expected request with `Content-Type: application/json`".into(),
            ));
        }
        let Json(request) = Json::<CallbackRequest>::from_bytes(&body)
            .map_err(|e: JsonRejection| ApiError::BadRequest(e.body_text()))?;
        request
    };
    let callback = ctx.service.request_callback(&id, request)?;
    Ok((StatusCode::CREATED, Json(callback)))
}

fn has_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}
