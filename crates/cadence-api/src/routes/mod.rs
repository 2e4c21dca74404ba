pub mod agents;
pub mod connections;
pub mod executions;
pub mod jobs;

pub use agents::router as agents_router;
pub use connections::router as connections_router;
pub use executions::router as executions_router;
pub use jobs::router as jobs_router;

use axum::http::{HeaderMap, StatusCode};
use axum::{routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::state::AppState;

/// Create the main API router with all routes
pub fn create_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/", get(api_info))
        .nest("/api", api_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(jobs_router())
        .merge(executions_router())
        .merge(agents_router())
        .merge(connections_router())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// API info endpoint
async fn api_info() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Cadence Scheduler API",
        "version": cadence_core::VERSION,
        "status": "operational"
    }))
}

/// Map a core error onto the wire: 4xx for caller mistakes, 5xx for faults
pub(crate) fn error_response(e: &cadence_core::Error) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(serde_json::json!({
            "error": e.to_string(),
            "category": e.category(),
        })),
    )
}

/// Parse a path id, answering 400 with a JSON body on junk input
pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, (StatusCode, Json<serde_json::Value>)> {
    Uuid::parse_str(raw).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": format!("Invalid id: {}", raw) })),
        )
    })
}

/// Pull the bearer token agent endpoints authenticate with
pub(crate) fn bearer_token(
    headers: &HeaderMap,
) -> Result<String, (StatusCode, Json<serde_json::Value>)> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Missing bearer token" })),
        ))
}
