//! HTTP error type
//!
//! Every error leaves the API as JSON with an `error` member.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::RefreshError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown route (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Refresh failed (500)
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "Not Found", "message": message }),
            ),
            ApiError::Refresh(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": err.to_string() }),
            ),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": message }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
