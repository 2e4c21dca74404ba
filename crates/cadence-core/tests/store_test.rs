//! Store-level integration tests. They need a reachable Postgres (settings
//! from the `DB_*` environment) and skip silently when none is available.

use cadence_core::models::{ExecutionFilter, ExecutionMode, ExecutionOutcome, ExecutionStatus};
use cadence_core::repository::{
    CreateJobRequest, ExecutionRepository, JobRepository, StartExecution, UpdateJobRequest,
};
use cadence_core::{Config, Database};
use uuid::Uuid;

async fn test_db() -> Option<Database> {
    let mut config = Config::default();
    config.database.apply_env();
    config.database.connection_timeout_secs = 2;

    match Database::connect(&config.database).await {
        Ok(db) => {
            db.migrate().await.ok()?;
            Some(db)
        }
        Err(_) => None,
    }
}

fn sql_job(name: &str) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        description: Some("integration fixture".into()),
        yaml_configuration: Some(
            "name: fixture\ntype: sql\nquery: SELECT 1 AS v\nconnection: default\n".into(),
        ),
        created_by: Some("tests".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_job_round_trip_and_lifecycle() {
    let Some(db) = test_db().await else { return };
    let jobs = JobRepository::new(db);

    let name = format!("it-roundtrip-{}", Uuid::new_v4());
    let job_id = jobs.create_job(sql_job(&name)).await.unwrap();

    // get(create(J)) preserves everything but server-assigned fields
    let details = jobs.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(details.record.name, name);
    assert_eq!(details.flat.job_type, "sql");
    assert_eq!(details.flat.query.as_deref(), Some("SELECT 1 AS v"));
    assert!(details.record.enabled);
    assert_eq!(details.record.version, "2.0");

    // Toggle without an explicit value flips
    let enabled = jobs.toggle_job(job_id, None).await.unwrap();
    assert!(!enabled);
    let enabled = jobs.toggle_job(job_id, Some(true)).await.unwrap();
    assert!(enabled);

    // Flat-field update rebuilds the blob deterministically
    let update = UpdateJobRequest {
        flat: cadence_core::repository::FlatJobFields {
            job_type: Some("sql".into()),
            query: Some("SELECT 2 AS v".into()),
            connection: Some("default".into()),
            ..Default::default()
        },
        ..Default::default()
    };
    jobs.update_job(job_id, update).await.unwrap();
    let details = jobs.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(details.flat.query.as_deref(), Some("SELECT 2 AS v"));

    jobs.delete_job(job_id).await.unwrap();
    assert!(jobs.get_job(job_id).await.unwrap().is_none());
    let err = jobs.delete_job(job_id).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_history_terminal_write_is_single() {
    let Some(db) = test_db().await else { return };
    let jobs = JobRepository::new(db.clone());
    let executions = ExecutionRepository::new(db);

    let name = format!("it-history-{}", Uuid::new_v4());
    let job_id = jobs.create_job(sql_job(&name)).await.unwrap();

    let execution_id = executions
        .record_execution_start(StartExecution {
            job_id,
            job_name: name.clone(),
            mode: ExecutionMode::Manual,
            executed_by: "tests".into(),
            execution_timezone: "UTC".into(),
            retry_count: 0,
            max_retries: 0,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    assert_eq!(executions.count_active(job_id).await.unwrap(), 1);

    executions
        .record_execution_end(execution_id, &ExecutionOutcome::success("done"))
        .await
        .unwrap();

    // Terminal rows are immutable; the second writer loses
    let err = executions
        .record_execution_end(execution_id, &ExecutionOutcome::failed("late writer"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "already_terminal");

    let record = executions.get(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    let end_time = record.end_time.unwrap();
    assert!(end_time >= record.start_time);
    let duration = record.duration_seconds.unwrap();
    let wall = (end_time - record.start_time).num_milliseconds() as f64 / 1000.0;
    assert!((duration - wall).abs() < 0.05);

    assert_eq!(executions.count_active(job_id).await.unwrap(), 0);

    // History survives job deletion
    let jobs_repo = jobs;
    jobs_repo.delete_job(job_id).await.unwrap();
    let rows = executions
        .list(&ExecutionFilter {
            job_id: Some(job_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].job_name, name);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let Some(db) = test_db().await else { return };
    let jobs = JobRepository::new(db.clone());
    let executions = ExecutionRepository::new(db);

    let name = format!("it-cancel-{}", Uuid::new_v4());
    let job_id = jobs.create_job(sql_job(&name)).await.unwrap();

    let execution_id = executions
        .record_execution_start(StartExecution {
            job_id,
            job_name: name,
            mode: ExecutionMode::Api,
            executed_by: "tests".into(),
            execution_timezone: "UTC".into(),
            retry_count: 0,
            max_retries: 0,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    assert!(executions.cancel(execution_id, "test cancel").await.unwrap());
    // Second cancel is a no-op, not an error
    assert!(!executions.cancel(execution_id, "again").await.unwrap());

    let record = executions.get(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, "cancelled");
    assert_eq!(
        ExecutionStatus::parse(&record.status),
        Some(ExecutionStatus::Cancelled)
    );

    // Cancelling a row that finished some other way is already_terminal
    let err = executions
        .record_execution_end(execution_id, &ExecutionOutcome::success("nope"))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "already_terminal");
}

#[tokio::test]
async fn test_queued_assignment_transitions() {
    let Some(db) = test_db().await else { return };
    let jobs = JobRepository::new(db.clone());
    let executions = ExecutionRepository::new(db);

    let name = format!("it-transitions-{}", Uuid::new_v4());
    let job_id = jobs.create_job(sql_job(&name)).await.unwrap();

    let execution_id = executions
        .record_execution_start(StartExecution {
            job_id,
            job_name: name,
            mode: ExecutionMode::Scheduled,
            executed_by: "system".into(),
            execution_timezone: "UTC".into(),
            retry_count: 0,
            max_retries: 0,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();

    executions.mark_queued(execution_id).await.unwrap();
    executions.mark_assigned(execution_id).await.unwrap();

    // assigned -> assigned is rejected by the state machine guard
    let err = executions.mark_assigned(execution_id).await.unwrap_err();
    assert_eq!(err.status_code(), 409);

    executions
        .record_execution_end(execution_id, &ExecutionOutcome::success("agent done"))
        .await
        .unwrap();
}
