//! Router-level tests that exercise request plumbing without a database:
//! health, id parsing, and agent authentication rejections.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use cadence_api::{build_state, create_router};
use cadence_core::{Config, Database};

fn test_router() -> (axum::Router, CancellationToken) {
    let mut config = Config::default();
    // No live infrastructure in these tests
    config.scheduler.enabled = false;
    config.retention.enabled = false;

    let db = Database::connect_lazy(&config.database).expect("lazy pool");
    let shutdown = CancellationToken::new();
    let (state, _handles) = build_state(&config, db, shutdown.clone()).expect("state");
    (create_router(state), shutdown)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (router, shutdown) = test_router();
    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    shutdown.cancel();
}

#[tokio::test]
async fn test_api_info_reports_version() {
    let (router, shutdown) = test_router();
    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "operational");
    assert!(body["version"].as_str().is_some());
    shutdown.cancel();
}

#[tokio::test]
async fn test_invalid_job_id_is_bad_request() {
    let (router, shutdown) = test_router();
    let response = router
        .oneshot(
            Request::get("/api/jobs/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("Invalid id"));
    shutdown.cancel();
}

#[tokio::test]
async fn test_heartbeat_requires_bearer_token() {
    let (router, shutdown) = test_router();
    let response = router
        .oneshot(
            Request::post("/api/agent/heartbeat")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"agent_id":"a1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    shutdown.cancel();
}

#[tokio::test]
async fn test_complete_requires_bearer_token() {
    let (router, shutdown) = test_router();
    let execution_id = uuid::Uuid::new_v4();
    let response = router
        .oneshot(
            Request::post(format!("/api/agent/jobs/{}/complete", execution_id))
                .header("content-type", "application/json")
                .body(Body::from(r#"{"success":true}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    shutdown.cancel();
}
