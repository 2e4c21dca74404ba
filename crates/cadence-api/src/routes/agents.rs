//! Agent-facing endpoints: registration, heartbeats, progress and
//! completion callbacks. Everything past registration is bearer-token
//! authenticated against the registry.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use cadence_core::dispatch::{
    CompletionReport, HeartbeatRequest, RegisterRequest, StatusUpdateRequest,
};

use super::{bearer_token, error_response, parse_uuid};
use crate::state::AppState;

/// Agent registration; answers with the issued auth token
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.dispatcher.register(request).await {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))),
        Err(e) => error_response(&e),
    }
}

pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<HeartbeatRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(rejection) => return rejection,
    };

    match state.dispatcher.heartbeat(request, &token).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "acknowledged": true })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Intermediate progress report; updates execution metadata only
pub async fn status_update(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusUpdateRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let execution_id = match parse_uuid(&execution_id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(rejection) => return rejection,
    };

    match state
        .dispatcher
        .status_update(execution_id, request, &token)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "recorded": true })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Terminal completion report from an agent
pub async fn complete(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
    Json(report): Json<CompletionReport>,
) -> (StatusCode, Json<serde_json::Value>) {
    let execution_id = match parse_uuid(&execution_id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };
    let token = match bearer_token(&headers) {
        Ok(token) => token,
        Err(rejection) => return rejection,
    };

    match state.dispatcher.complete(execution_id, report, &token).await {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": status.as_str() })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Registry listing for operators
pub async fn list_agents(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.dispatcher.list_agents().await {
        Ok(agents) => (
            StatusCode::OK,
            Json(serde_json::json!({ "agents": agents, "count": agents.len() })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Router for agent routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agent/register", post(register))
        .route("/agent/heartbeat", post(heartbeat))
        .route("/agent/jobs/:execution_id/status", post(status_update))
        .route("/agent/jobs/:execution_id/complete", post(complete))
        .route("/agents", get(list_agents))
}
