//! Error types for the fleetd core

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use api_models::ErrorResponse;

/// Main error type for the fleetd core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate exceeded: {0}")]
    RateLimited(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable kind, used in error bodies and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Unauthenticated(_) => "unauthenticated",
            CoreError::Validation(_) => "validation",
            CoreError::Conflict(_) => "conflict",
            CoreError::NotFound(_) => "not_found",
            CoreError::RateLimited(_) => "rate_limited",
            CoreError::Unreachable(_) => "unreachable",
            CoreError::Internal(_) => "internal",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(err.to_string())
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        // Internal detail (storage paths, I/O errors) never reaches callers
        let message = match &self {
            CoreError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message,
        };

        (self.status_code(), Json(body)).into_response()
    }
}
