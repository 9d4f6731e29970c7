// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use jobrelay_core::JobError;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Body returned by retired endpoints. `deprecated` is always `true`, so
/// a 410 from a turned-off surface is distinguishable from a plain 404.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct DeprecationNotice {
    pub error: String,
    pub deprecated: bool,
    pub notice: String,
}

impl DeprecationNotice {
    pub fn legacy_polling() -> Self {
        Self {
            error: "Legacy polling API is disabled".to_string(),
            deprecated: true,
            notice: "Token polling has been retired; subscribe to /api/jobs/stream for pushed progress updates".to_string(),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job not finished: {0}")]
    JobNotReady(String),

    #[error("Legacy polling API is disabled")]
    LegacyDisabled,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound { token } => ApiError::JobNotFound(token),
            JobError::NotReady { token } => ApiError::JobNotReady(token),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::JobNotFound(token) => {
                tracing::warn!(token = %token, "Job not found");
                (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse::with_details(
                        "Job not found",
                        format!("Token: {token}"),
                    )),
                )
                    .into_response()
            }
            ApiError::JobNotReady(token) => {
                tracing::debug!(token = %token, "Result requested before terminal state");
                (
                    StatusCode::CONFLICT,
                    Json(ErrorResponse::with_details(
                        "Job not finished",
                        format!("Token: {token}"),
                    )),
                )
                    .into_response()
            }
            ApiError::LegacyDisabled => (
                StatusCode::GONE,
                Json(DeprecationNotice::legacy_polling()),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(message = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new("Internal server error")),
                )
                    .into_response()
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
