//! Cross-job execution history and cancellation

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use cadence_core::models::{ExecutionFilter, ExecutionStatus};

use super::{error_response, parse_uuid};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub job_id: Option<String>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub limit: Option<i64>,
}

/// Cross-job execution history, newest first
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match &query.job_id {
        Some(raw) => match parse_uuid(raw) {
            Ok(id) => Some(id),
            Err(rejection) => return rejection,
        },
        None => None,
    };

    let filter = ExecutionFilter {
        job_id,
        status: query.status.as_deref().and_then(ExecutionStatus::parse),
        limit: query.limit,
    };

    match state.executions.list(&filter).await {
        Ok(executions) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "executions": executions,
                "count": executions.len(),
            })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Fetch one execution record
pub async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let execution_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.executions.get(execution_id).await {
        Ok(Some(execution)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "execution": execution })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Execution not found" })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Cancel an execution in any non-terminal state. Running inline work is
/// aborted here; queued/assigned work is revoked through the dispatcher.
pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let execution_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    if state.executor.cancel_running(execution_id).await {
        return (
            StatusCode::OK,
            Json(serde_json::json!({ "cancelled": true })),
        );
    }

    match state
        .dispatcher
        .cancel(execution_id, "Cancelled via API")
        .await
    {
        Ok(changed) => (
            StatusCode::OK,
            Json(serde_json::json!({ "cancelled": changed })),
        ),
        Err(e) => error_response(&e),
    }
}

/// Router for execution routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/executions/history", get(history))
        .route("/executions/:id", get(get_execution))
        .route("/executions/:id/cancel", post(cancel_execution))
}
