//! End-to-end agent dispatch against a wiremock agent endpoint. Needs a
//! reachable Postgres; skips silently without one.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cadence_core::dispatch::{CompletionReport, RegisterRequest};
use cadence_core::models::{ExecutionMode, ExecutionStatus};
use cadence_core::repository::{AgentRepository, ExecutionRepository, JobRepository, StartExecution};
use cadence_core::{AgentClient, AgentDispatcher, Config, CreateJobRequest, Database};

struct Harness {
    dispatcher: AgentDispatcher,
    jobs: JobRepository,
    executions: ExecutionRepository,
    agents: AgentRepository,
}

async fn harness(heartbeat_secs: u64) -> Option<Harness> {
    let mut config = Config::default();
    config.database.apply_env();
    config.database.connection_timeout_secs = 2;
    config.agents.heartbeat_interval_secs = heartbeat_secs;

    let db = Database::connect(&config.database).await.ok()?;
    db.migrate().await.ok()?;

    let jobs = JobRepository::new(db.clone());
    let executions = ExecutionRepository::new(db.clone());
    let agents = AgentRepository::new(db);

    let client = AgentClient::new(Duration::from_secs(2)).ok()?;
    let dispatcher = AgentDispatcher::new(
        agents.clone(),
        executions.clone(),
        jobs.clone(),
        client,
        config.agents.clone(),
        Arc::new(Notify::new()),
    );

    Some(Harness {
        dispatcher,
        jobs,
        executions,
        agents,
    })
}

fn agent_job(name: &str, pool: &str) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        yaml_configuration: Some(format!(
            "name: {}\ntype: agent_job\nagent_pool: {}\nsteps:\n  - name: step1\n    action: cmd\n    command: echo hi\n",
            name, pool
        )),
        created_by: Some("tests".into()),
        ..Default::default()
    }
}

/// Queue an execution for the given job the way the agent backend does
async fn queue_execution(h: &Harness, job_id: Uuid, name: &str, pool: &str) -> Uuid {
    let execution_id = h
        .executions
        .record_execution_start(StartExecution {
            job_id,
            job_name: name.to_string(),
            mode: ExecutionMode::Manual,
            executed_by: "tests".into(),
            execution_timezone: "UTC".into(),
            retry_count: 0,
            max_retries: 0,
            metadata: serde_json::json!({}),
        })
        .await
        .unwrap();
    h.executions.mark_queued(execution_id).await.unwrap();
    h.executions
        .append_metadata(execution_id, serde_json::json!({ "agent_pool": pool }))
        .await
        .unwrap();
    execution_id
}

#[tokio::test]
async fn test_assignment_and_completion_flow() {
    let Some(h) = harness(30).await else { return };

    // A wiremock server plays the passive agent
    let agent_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/job/assign"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&agent_server)
        .await;

    let pool = format!("pool-{}", Uuid::new_v4());
    let agent_id = format!("agent-{}", Uuid::new_v4());
    let registration = h
        .dispatcher
        .register(RegisterRequest {
            agent_id: agent_id.clone(),
            pool_id: pool.clone(),
            endpoint_url: agent_server.uri(),
            capabilities: vec!["cmd".into()],
            max_parallel_jobs: 2,
            os_info: Some("linux".into()),
            cpu_count: Some(4),
            memory_mb: Some(8192),
            disk_free_mb: Some(50_000),
        })
        .await
        .unwrap();
    assert_eq!(registration.auth_token.len(), 64);

    let name = format!("it-agent-{}", Uuid::new_v4());
    let job_id = h.jobs.create_job(agent_job(&name, &pool)).await.unwrap();
    let execution_id = queue_execution(&h, job_id, &name, &pool).await;

    // The sweep places the queued execution on the registered agent
    h.dispatcher.sweep_once().await.unwrap();

    let record = h.executions.get(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, "assigned");
    let agent = h.agents.get(&agent_id).await.unwrap().unwrap();
    assert_eq!(agent.active_jobs, 1);

    // Agent reports completion with its issued token
    let status = h
        .dispatcher
        .complete(
            execution_id,
            CompletionReport {
                success: true,
                output: Some("HELLO".into()),
                error: None,
                return_code: Some(0),
                logs: vec!["step1 ok".into()],
            },
            &registration.auth_token,
        )
        .await
        .unwrap();
    assert_eq!(status, ExecutionStatus::Success);

    let record = h.executions.get(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, "success");
    assert_eq!(record.output_log.as_deref(), Some("HELLO"));

    // Slot freed
    let agent = h.agents.get(&agent_id).await.unwrap().unwrap();
    assert_eq!(agent.active_jobs, 0);
    assert_eq!(agent.jobs_completed, 1);

    // Duplicate completion loses
    let err = h
        .dispatcher
        .complete(
            execution_id,
            CompletionReport {
                success: false,
                output: None,
                error: Some("late".into()),
                return_code: None,
                logs: vec![],
            },
            &registration.auth_token,
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_completion_rejects_bad_token() {
    let Some(h) = harness(30).await else { return };

    let agent_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/job/assign"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&agent_server)
        .await;

    let pool = format!("pool-{}", Uuid::new_v4());
    h.dispatcher
        .register(RegisterRequest {
            agent_id: format!("agent-{}", Uuid::new_v4()),
            pool_id: pool.clone(),
            endpoint_url: agent_server.uri(),
            capabilities: vec![],
            max_parallel_jobs: 1,
            os_info: None,
            cpu_count: None,
            memory_mb: None,
            disk_free_mb: None,
        })
        .await
        .unwrap();

    let name = format!("it-token-{}", Uuid::new_v4());
    let job_id = h.jobs.create_job(agent_job(&name, &pool)).await.unwrap();
    let execution_id = queue_execution(&h, job_id, &name, &pool).await;
    h.dispatcher.sweep_once().await.unwrap();

    let err = h
        .dispatcher
        .complete(
            execution_id,
            CompletionReport {
                success: true,
                output: None,
                error: None,
                return_code: None,
                logs: vec![],
            },
            "wrong-token",
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 403);
}

#[tokio::test]
async fn test_agent_lost_orphan_reconciliation() {
    // Tiny heartbeat interval so the orphan window (3x) elapses quickly
    let Some(h) = harness(1).await else { return };

    let agent_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/job/assign"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&agent_server)
        .await;

    let pool = format!("pool-{}", Uuid::new_v4());
    let agent_id = format!("agent-{}", Uuid::new_v4());
    h.dispatcher
        .register(RegisterRequest {
            agent_id: agent_id.clone(),
            pool_id: pool.clone(),
            endpoint_url: agent_server.uri(),
            capabilities: vec![],
            max_parallel_jobs: 1,
            os_info: None,
            cpu_count: None,
            memory_mb: None,
            disk_free_mb: None,
        })
        .await
        .unwrap();

    let name = format!("it-orphan-{}", Uuid::new_v4());
    let job_id = h.jobs.create_job(agent_job(&name, &pool)).await.unwrap();
    let execution_id = queue_execution(&h, job_id, &name, &pool).await;

    h.dispatcher.sweep_once().await.unwrap();

    // The agent never heartbeats again; wait past the orphan window
    tokio::time::sleep(Duration::from_secs(4)).await;
    h.dispatcher.sweep_once().await.unwrap();

    let record = h.executions.get(execution_id).await.unwrap().unwrap();
    assert_eq!(record.status, "failed");
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .contains("Agent lost"));

    // Assignment is closed and the slot freed
    let assignment = h.agents.assignment_for(execution_id).await.unwrap().unwrap();
    assert!(!assignment.is_live());
    let agent = h.agents.get(&agent_id).await.unwrap().unwrap();
    assert_eq!(agent.active_jobs, 0);
}
