//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::dispatch::DispatchError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Provider identity required")]
    Unauthorized,
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Provider identity required".to_string(),
            ),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail.clone()),
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail.clone())
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Dispatch(err) => {
                let status = match err {
                    DispatchError::Validation(_) | DispatchError::InvalidPriority(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    DispatchError::UnknownEncounter(_) | DispatchError::UnknownCallback(_) => {
                        StatusCode::NOT_FOUND
                    }
                    DispatchError::DuplicateWork { .. }
                    | DispatchError::AlreadyAssigned { .. }
                    | DispatchError::NotOwner { .. }
                    | DispatchError::InvalidState { .. } => StatusCode::CONFLICT,
                    DispatchError::MissingOutcome => StatusCode::UNPROCESSABLE_ENTITY,
                    DispatchError::Store(_) | DispatchError::LockPoisoned => {
                        tracing::error!(error = %err, "Dispatch internal error");
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            err.code(),
                            "An internal error occurred".to_string(),
                        );
                    }
                };
                (status, err.code(), err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}
