//! Dashboard data endpoints
//!
//! Both handlers run the coordinator on a spawned task so a client that
//! disconnects mid-refresh does not abort the refresh itself.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::models::DashboardSnapshot;
use crate::AppState;

/// GET /api/dashboard-data
///
/// Cached snapshot, refreshed first when stale. Refresh failures degrade to
/// an all-zero snapshot.
pub async fn get_dashboard_data(State(state): State<AppState>) -> ApiResult<Json<DashboardSnapshot>> {
    let coordinator = Arc::clone(&state.coordinator);
    let snapshot = tokio::spawn(async move { coordinator.get_dashboard_data().await })
        .await
        .map_err(|e| ApiError::Internal(format!("dashboard task failed: {}", e)))?;

    Ok(Json(snapshot))
}

/// POST /api/refresh
///
/// Forces a refresh; failures are returned as `{"error": ...}` with 500.
pub async fn refresh_data(State(state): State<AppState>) -> ApiResult<Json<DashboardSnapshot>> {
    tracing::info!("Manual refresh requested");

    let coordinator = Arc::clone(&state.coordinator);
    let snapshot = tokio::spawn(async move { coordinator.refresh().await })
        .await
        .map_err(|e| ApiError::Internal(format!("refresh task failed: {}", e)))??;

    Ok(Json(snapshot))
}

/// Build dashboard routes
pub fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/api/dashboard-data", get(get_dashboard_data))
        .route("/api/refresh", post(refresh_data))
}
