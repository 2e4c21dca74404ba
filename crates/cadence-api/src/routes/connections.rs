//! Named connection management for SQL jobs

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use sqlx::Connection;
use std::time::Duration;

use cadence_core::repository::CreateConnectionRequest;

use super::{error_response, parse_uuid};
use crate::state::AppState;

pub async fn list_connections(
    State(state): State<AppState>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.connections.list().await {
        Ok(connections) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "connections": connections,
                "count": connections.len(),
            })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn create_connection(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.connections.create(request).await {
        Ok(connection_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "connection_id": connection_id })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let connection_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.connections.delete(connection_id).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "deleted": true }))),
        Err(e) => error_response(&e),
    }
}

/// Probe a stored connection by opening and closing a session
pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let connection_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let connection = match state.connections.list().await {
        Ok(connections) => connections
            .into_iter()
            .find(|c| c.connection_id == connection_id),
        Err(e) => return error_response(&e),
    };

    let Some(connection) = connection else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Connection not found" })),
        );
    };

    let timeout = Duration::from_secs(connection.connection_timeout.max(1) as u64);
    let probe = tokio::time::timeout(
        timeout,
        sqlx::PgConnection::connect(&connection.connection_url()),
    )
    .await;

    match probe {
        Ok(Ok(mut session)) => {
            let _ = session.close().await;
            (
                StatusCode::OK,
                Json(serde_json::json!({ "success": true, "message": "Connection OK" })),
            )
        }
        Ok(Err(e)) => (
            StatusCode::OK,
            Json(serde_json::json!({ "success": false, "message": e.to_string() })),
        ),
        Err(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": false,
                "message": format!("Timed out after {}s", timeout.as_secs()),
            })),
        ),
    }
}

/// Router for connection routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/connections", get(list_connections).post(create_connection))
        .route("/connections/:id", axum::routing::delete(delete_connection))
        .route("/connections/:id/test", post(test_connection))
}
