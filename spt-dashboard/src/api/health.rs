//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use spt_common::time;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: String,
    /// Module name ("spt-dashboard")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    pub timestamp: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Most recent refresh failure, if the last refresh failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /api/health
///
/// Refresh failures never change the status; they only show up in
/// `last_error`.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let uptime_seconds = now
        .signed_duration_since(state.startup_time)
        .num_seconds()
        .max(0) as u64;

    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "spt-dashboard".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: time::to_iso(now),
        uptime_seconds,
        last_error: state.coordinator.last_error().await,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/api/health", get(health_check))
}
