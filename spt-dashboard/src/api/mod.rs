//! HTTP API handlers

pub mod dashboard;
pub mod health;

pub use dashboard::dashboard_routes;
pub use health::health_routes;

use axum::http::Uri;

use crate::error::ApiError;

/// Fallback for unknown routes
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
