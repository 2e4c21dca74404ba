//! Job CRUD, manual invocation and per-job history

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use cadence_core::models::{ExecutionFilter, ExecutionMode, ExecutionStatus, JobFilter, JobFlatView, JobType};
use cadence_core::repository::{CreateJobRequest, UpdateJobRequest};
use cadence_core::ExecutionSummary;

use super::{error_response, parse_uuid};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub enabled_only: Option<bool>,

    #[serde(rename = "type", default)]
    pub job_type: Option<String>,

    #[serde(default)]
    pub limit: Option<i64>,
}

/// List jobs with their flattened views
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let filter = JobFilter {
        enabled_only: query.enabled_only.unwrap_or(false),
        job_type: query.job_type.as_deref().map(JobType::parse),
        limit: query.limit,
    };

    match state.jobs.list_jobs(&filter).await {
        Ok(records) => {
            let jobs: Vec<serde_json::Value> = records
                .iter()
                .map(|record| {
                    let definition = record.definition();
                    serde_json::json!(JobFlatView::build(record, &definition))
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "jobs": jobs, "count": jobs.len() })),
            )
        }
        Err(e) => {
            tracing::error!("Failed to list jobs: {}", e);
            error_response(&e)
        }
    }
}

/// Create a job from a YAML blob or flat form fields
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.jobs.create_job(request).await {
        Ok(job_id) => {
            state.scheduler.notify_job_changed(job_id);
            (
                StatusCode::CREATED,
                Json(serde_json::json!({ "job_id": job_id })),
            )
        }
        Err(e) => error_response(&e),
    }
}

/// Fetch a job: raw record, flattened view and the YAML verbatim
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.jobs.get_job(job_id).await {
        Ok(Some(details)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "job": details.flat,
                "yaml_configuration": details.record.yaml_configuration,
                "enabled": details.record.enabled,
            })),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Job not found" })),
        ),
        Err(e) => error_response(&e),
    }
}

pub async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateJobRequest>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.jobs.update_job(job_id, request).await {
        Ok(()) => {
            state.scheduler.notify_job_changed(job_id);
            (StatusCode::OK, Json(serde_json::json!({ "updated": true })))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    match state.jobs.delete_job(job_id).await {
        Ok(()) => {
            state.scheduler.notify_job_removed(job_id);
            (StatusCode::OK, Json(serde_json::json!({ "deleted": true })))
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ToggleRequest {
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn toggle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<ToggleRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let enabled = request.and_then(|Json(r)| r.enabled);
    match state.jobs.toggle_job(job_id, enabled).await {
        Ok(enabled) => {
            state.scheduler.notify_job_changed(job_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({ "enabled": enabled })),
            )
        }
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub allow_overlap: bool,

    #[serde(default)]
    pub executed_by: Option<String>,
}

/// Manual execution; inline backends answer with the terminal outcome
pub async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    request: Option<Json<RunRequest>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let actor = request.executed_by.as_deref().unwrap_or("api");

    match state
        .executor
        .execute_job(job_id, ExecutionMode::Manual, actor, request.allow_overlap)
        .await
    {
        Ok(ExecutionSummary::Completed {
            execution_id,
            status,
            output,
            error_message,
            return_code,
        }) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "execution_id": execution_id,
                "status": status.as_str(),
                "output": output,
                "error_message": error_message,
                "return_code": return_code,
            })),
        ),
        Ok(ExecutionSummary::Handoff { execution_id }) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "execution_id": execution_id,
                "status": ExecutionStatus::Queued.as_str(),
            })),
        ),
        Ok(ExecutionSummary::Skipped { reason }) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": reason })),
        ),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JobLogsQuery {
    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub limit: Option<i64>,
}

/// Execution history for one job
pub async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<JobLogsQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    let job_id = match parse_uuid(&id) {
        Ok(id) => id,
        Err(rejection) => return rejection,
    };

    let filter = ExecutionFilter {
        job_id: Some(job_id),
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

/// Router for job routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route(
            "/jobs/:id",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/jobs/:id/toggle", post(toggle_job))
        .route("/jobs/:id/run", post(run_job))
        .route("/jobs/:id/logs", get(job_logs))
}
