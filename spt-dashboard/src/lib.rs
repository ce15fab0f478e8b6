//! spt-dashboard library interface
//!
//! Exposes the refresh pipeline and the HTTP router for the binaries and
//! integration tests.

pub mod api;
pub mod crm;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::RefreshCoordinator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            coordinator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::dashboard_routes())
        .fallback(api::not_found)
        .with_state(state)
        // Dashboard front-end is served from a different origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
