//! HTTP Server & Routing Integration Tests

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use helpers::{standard_source, test_coordinator, FakeRecordSource};
use spt_dashboard::services::transformer;
use spt_dashboard::{build_router, AppState};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn health_reports_service_identity() {
    let dir = TempDir::new().unwrap();
    let coordinator = test_coordinator(dir.path(), Arc::new(standard_source()));
    let app = build_router(AppState::new(coordinator));

    let response = app.oneshot(get("/api/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["module"], "spt-dashboard");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["timestamp"].is_string());
    assert!(json["uptime_seconds"].is_u64());
    assert!(json.get("last_error").is_none());
}

#[tokio::test]
async fn dashboard_data_serves_fresh_cache_without_fetching() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(standard_source());
    let coordinator = test_coordinator(dir.path(), source.clone());

    let mut cached = transformer::empty_snapshot();
    cached.deals.total_deals = 7;
    coordinator.store().save_current(&cached).await.unwrap();

    let app = build_router(AppState::new(coordinator));
    let response = app.oneshot(get("/api/dashboard-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deals"]["total_deals"], 7);
    assert_eq!(source.submits(), 0);
}

#[tokio::test]
async fn dashboard_data_refreshes_when_cache_missing() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(standard_source());
    let coordinator = test_coordinator(dir.path(), source.clone());
    let app = build_router(AppState::new(coordinator));

    let response = app.oneshot(get("/api/dashboard-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deals"]["total_deals"], 3);
    assert_eq!(json["deals"]["total_value"], 600.0);
    assert_eq!(json["deals"]["monthly_trends"]["2024-03"], 600.0);
    assert_eq!(json["deals"]["currency"]["code"], "USD");
    assert_eq!(json["accounts"]["industry_distribution"]["Technology"], 2);
    assert_eq!(json["accounts"]["account_types"]["Unknown"], 1);
    assert!(json["last_updated"].is_string());
    assert_eq!(source.submits(), 2);
}

#[tokio::test]
async fn dashboard_data_degrades_on_refresh_failure() {
    let dir = TempDir::new().unwrap();
    let mut source = standard_source();
    source.reject_submit = true;
    let coordinator = test_coordinator(dir.path(), Arc::new(source));
    let app = build_router(AppState::new(coordinator));

    let response = app.oneshot(get("/api/dashboard-data")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deals"]["total_deals"], 0);
    assert_eq!(json["deals"]["win_rate"], 0.0);
    assert_eq!(json["accounts"]["total_accounts"], 0);
}

#[tokio::test]
async fn refresh_returns_new_snapshot() {
    let dir = TempDir::new().unwrap();
    let coordinator = test_coordinator(dir.path(), Arc::new(standard_source()));
    let app = build_router(AppState::new(coordinator.clone()));

    let response = app.oneshot(post("/api/refresh")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["deals"]["stages"]["Closed Won"], 2);
    assert!(coordinator.store().load_current().await.is_some());
}

#[tokio::test]
async fn refresh_failure_is_500_with_error_message() {
    let dir = TempDir::new().unwrap();
    let mut source = standard_source();
    source.fail_jobs = true;
    let coordinator = test_coordinator(dir.path(), Arc::new(source));
    let app = build_router(AppState::new(coordinator));

    let response = app.clone().oneshot(post("/api/refresh")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("failed upstream"), "unexpected message: {}", message);

    // Health stays up and reports the failure
    let health = body_json(app.oneshot(get("/api/health")).await.unwrap()).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["last_error"].is_string());
}

#[tokio::test]
async fn refresh_requires_post() {
    let dir = TempDir::new().unwrap();
    let coordinator = test_coordinator(dir.path(), Arc::new(FakeRecordSource::new()));
    let app = build_router(AppState::new(coordinator));

    let response = app.oneshot(get("/api/refresh")).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let dir = TempDir::new().unwrap();
    let coordinator = test_coordinator(dir.path(), Arc::new(FakeRecordSource::new()));
    let app = build_router(AppState::new(coordinator));

    let response = app.oneshot(get("/api/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["error"], "Not Found");
    assert!(json["message"].as_str().unwrap().contains("/api/nope"));
}

#[tokio::test]
async fn cors_headers_present() {
    let dir = TempDir::new().unwrap();
    let coordinator = test_coordinator(dir.path(), Arc::new(FakeRecordSource::new()));
    let app = build_router(AppState::new(coordinator));

    let request = Request::builder()
        .uri("/api/health")
        .header("origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert!(response
        .headers()
        .contains_key("access-control-allow-origin"));
}
