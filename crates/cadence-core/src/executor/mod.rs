//! Executor core: binds a job id to an actual run.
//!
//! Loads the definition, picks a backend, opens the history row, enforces
//! the deadline and the single-instance rule, and closes the row exactly
//! once. Errors inside the executor never propagate to the scheduler loop;
//! they are reified as failed history rows.

pub mod agent;
pub mod powershell;
pub mod sql;

pub use agent::AgentBackend;
pub use powershell::{PowerShellBackend, TIMEOUT_RETURN_CODE};
pub use sql::SqlBackend;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ExecutionConfig, SchedulerConfig};
use crate::models::{
    ExecutionMode, ExecutionOutcome, ExecutionStatus, JobDefinition, JobRecord, JobType,
};
use crate::repository::{ExecutionRepository, JobRepository, StartExecution};
use crate::{Error, Result};

/// What a backend reports back to the executor
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub return_code: i32,

    /// `false` means the execution was handed off (agent backend) and a
    /// later completion event finalizes the record
    pub terminal_now: bool,

    /// The deadline was exceeded and the work was stopped
    pub timed_out: bool,

    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Everything a backend needs for one run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub record: JobRecord,
    pub definition: JobDefinition,
    pub execution_id: Uuid,
    pub deadline: Duration,
}

/// Common contract of the three backends
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<BackendOutcome>;
}

/// Cap captured output; keeps the tail marker visible when cut
pub fn truncate_output(mut output: String, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output;
    }
    let mut cut = max_bytes;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }
    output.truncate(cut);
    output.push_str("\n... [output truncated]");
    output
}

/// Result of an execute request
#[derive(Debug, Clone)]
pub enum ExecutionSummary {
    /// Scheduled fire suppressed (disabled job, or coalesced overlap)
    Skipped { reason: String },

    /// An inline backend finished and the row is terminal
    Completed {
        execution_id: Uuid,
        status: ExecutionStatus,
        output: Option<String>,
        error_message: Option<String>,
        return_code: Option<i32>,
    },

    /// Handed off to agent dispatch; the row is `queued`
    Handoff { execution_id: Uuid },
}

impl ExecutionSummary {
    pub fn execution_id(&self) -> Option<Uuid> {
        match self {
            ExecutionSummary::Skipped { .. } => None,
            ExecutionSummary::Completed { execution_id, .. }
            | ExecutionSummary::Handoff { execution_id } => Some(*execution_id),
        }
    }
}

#[derive(Clone)]
pub struct JobExecutor {
    jobs: JobRepository,
    executions: ExecutionRepository,
    powershell: Arc<PowerShellBackend>,
    sql: Arc<SqlBackend>,
    agent: Arc<AgentBackend>,

    /// Jobs with an inline execution in flight in this process
    active: Arc<Mutex<HashSet<Uuid>>>,

    /// Cancellation handles for running inline executions
    running: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,

    default_timeout_secs: u64,
    retry_delay_secs: u64,
}

impl JobExecutor {
    pub fn new(
        jobs: JobRepository,
        executions: ExecutionRepository,
        powershell: PowerShellBackend,
        sql: SqlBackend,
        agent: AgentBackend,
        execution: &ExecutionConfig,
        scheduler: &SchedulerConfig,
    ) -> Self {
        Self {
            jobs,
            executions,
            powershell: Arc::new(powershell),
            sql: Arc::new(sql),
            agent: Arc::new(agent),
            active: Arc::new(Mutex::new(HashSet::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
            default_timeout_secs: execution.default_timeout_secs,
            retry_delay_secs: scheduler.retry_delay_secs,
        }
    }

    /// Execute a job now. `allow_overlap` only applies to manual/API modes;
    /// scheduled fires always coalesce.
    pub async fn execute_job(
        &self,
        job_id: Uuid,
        mode: ExecutionMode,
        actor: &str,
        allow_overlap: bool,
    ) -> Result<ExecutionSummary> {
        run_attempt(
            self.clone(),
            job_id,
            mode,
            actor.to_string(),
            allow_overlap,
            0,
        )
        .await
    }

    /// Cancel a `running` inline execution. Returns false when nothing is
    /// running here (queued/assigned rows are revoked by the dispatcher).
    pub async fn cancel_running(&self, execution_id: Uuid) -> bool {
        let running = self.running.lock().await;
        match running.get(&execution_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn backend_for(&self, job_type: JobType) -> Option<Arc<dyn ExecutionBackend>> {
        match job_type {
            JobType::PowerShell => Some(self.powershell.clone() as Arc<dyn ExecutionBackend>),
            JobType::Sql => Some(self.sql.clone() as Arc<dyn ExecutionBackend>),
            JobType::AgentJob => Some(self.agent.clone() as Arc<dyn ExecutionBackend>),
            JobType::Unknown => None,
        }
    }
}

/// Boxed so retries can re-enter without a recursive future type
fn run_attempt(
    executor: JobExecutor,
    job_id: Uuid,
    mode: ExecutionMode,
    actor: String,
    allow_overlap: bool,
    retry_count: i32,
) -> Pin<Box<dyn Future<Output = Result<ExecutionSummary>> + Send>> {
    Box::pin(async move {
        let details = executor
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)))?;
        let record = details.record;
        let definition = details.definition;

        if !record.enabled {
            return match mode {
                ExecutionMode::Scheduled => {
                    // Disabled jobs silently skip scheduled fires; no history row
                    Ok(ExecutionSummary::Skipped {
                        reason: format!("job '{}' is disabled", record.name),
                    })
                }
                _ => Err(Error::forbidden(format!(
                    "Job '{}' is disabled",
                    record.name
                ))),
            };
        }

        // Single-instance guard: the store's view of non-terminal rows
        // (covers queued/assigned agent work) plus an in-process set that
        // closes the window before the history row exists.
        if mode == ExecutionMode::Scheduled || !allow_overlap {
            match executor.executions.count_active(job_id).await {
                Ok(active_rows) if active_rows > 0 => {
                    return match mode {
                        ExecutionMode::Scheduled => {
                            warn!(job = %record.name, "scheduled fire coalesced; previous execution still active");
                            Ok(ExecutionSummary::Skipped {
                                reason: "previous execution still active".into(),
                            })
                        }
                        _ => Err(Error::already_running(format!(
                            "Job '{}' has an execution in flight",
                            record.name
                        ))),
                    };
                }
                Ok(_) => {}
                Err(e) => warn!(%job_id, "active-execution check failed: {}", e),
            }
        }

        let mut guard_held = false;
        {
            let mut active = executor.active.lock().await;
            if active.contains(&job_id) {
                match mode {
                    ExecutionMode::Scheduled => {
                        warn!(job = %record.name, "scheduled fire coalesced; previous execution still active");
                        return Ok(ExecutionSummary::Skipped {
                            reason: "previous execution still active".into(),
                        });
                    }
                    _ if !allow_overlap => {
                        return Err(Error::already_running(format!(
                            "Job '{}' has an execution in flight",
                            record.name
                        )))
                    }
                    _ => {}
                }
            } else if !allow_overlap || mode == ExecutionMode::Scheduled {
                active.insert(job_id);
                guard_held = true;
            }
        }

        let result = dispatch_once(&executor, &record, &definition, mode, &actor, retry_count)
            .await;

        if guard_held {
            executor.active.lock().await.remove(&job_id);
        }

        // Retries produce a brand-new execution record
        if let Ok(ExecutionSummary::Completed { status, .. }) = &result {
            let max_retries = definition.max_retries() as i32;
            let retriable = match status {
                ExecutionStatus::Failed => true,
                ExecutionStatus::Timeout => definition.retry_on_timeout,
                _ => false,
            };
            if retriable && retry_count < max_retries {
                let delay = Duration::from_secs(
                    definition.retry_delay.unwrap_or(executor.retry_delay_secs),
                );
                info!(
                    job = %record.name,
                    attempt = retry_count + 1,
                    max_retries,
                    delay_secs = delay.as_secs(),
                    "scheduling retry"
                );
                let executor = executor.clone();
                let actor = actor.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) =
                        run_attempt(executor, job_id, mode, actor, false, retry_count + 1).await
                    {
                        error!(%job_id, "retry attempt failed to start: {}", e);
                    }
                });
            }
        }

        result
    })
}

/// Open the history row, run the backend once, close the row
async fn dispatch_once(
    executor: &JobExecutor,
    record: &JobRecord,
    definition: &JobDefinition,
    mode: ExecutionMode,
    actor: &str,
    retry_count: i32,
) -> Result<ExecutionSummary> {
    let execution_timezone = definition
        .schedule
        .as_ref()
        .map(|s| s.timezone.clone())
        .unwrap_or_else(|| "UTC".to_string());

    let start = StartExecution {
        job_id: record.job_id,
        job_name: record.name.clone(),
        mode,
        executed_by: actor.to_string(),
        execution_timezone,
        retry_count,
        max_retries: definition.max_retries() as i32,
        metadata: serde_json::json!({}),
    };

    // History writes are best-effort: the run proceeds even when the store
    // cannot record it.
    let execution_id = match executor.executions.record_execution_start(start).await {
        Ok(id) => id,
        Err(e) => {
            error!(job = %record.name, "failed to open history row: {}", e);
            Uuid::new_v4()
        }
    };

    let Some(backend) = executor.backend_for(definition.job_type()) else {
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Failed,
            output: None,
            error_message: Some(format!(
                "Unknown job type: {}",
                definition.job_type.as_deref().unwrap_or("<missing>")
            )),
            return_code: None,
            metadata: serde_json::json!({}),
        };
        let error_message = outcome.error_message.clone();
        if let Err(e) = executor
            .executions
            .record_execution_end(execution_id, &outcome)
            .await
        {
            error!(%execution_id, "failed to close history row: {}", e);
        }
        return Ok(ExecutionSummary::Completed {
            execution_id,
            status: ExecutionStatus::Failed,
            output: None,
            error_message,
            return_code: None,
        });
    };

    let deadline = Duration::from_secs(definition.timeout_secs(executor.default_timeout_secs));
    let ctx = ExecutionContext {
        record: record.clone(),
        definition: definition.clone(),
        execution_id,
        deadline,
    };

    let token = CancellationToken::new();
    executor
        .running
        .lock()
        .await
        .insert(execution_id, token.clone());

    let backend_result = tokio::select! {
        result = backend.execute(&ctx) => Some(result),
        _ = token.cancelled() => None,
    };

    executor.running.lock().await.remove(&execution_id);

    match backend_result {
        None => {
            info!(job = %record.name, %execution_id, "execution cancelled");
            if let Err(e) = executor
                .executions
                .cancel(execution_id, "Cancelled by request")
                .await
            {
                error!(%execution_id, "failed to record cancellation: {}", e);
            }
            Ok(ExecutionSummary::Completed {
                execution_id,
                status: ExecutionStatus::Cancelled,
                output: None,
                error_message: Some("Cancelled by request".into()),
                return_code: None,
            })
        }
        Some(Ok(outcome)) if !outcome.terminal_now => {
            info!(job = %record.name, %execution_id, "handed off to agent dispatch");
            Ok(ExecutionSummary::Handoff { execution_id })
        }
        Some(Ok(outcome)) => {
            let status = if outcome.timed_out {
                ExecutionStatus::Timeout
            } else if outcome.success {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failed
            };

            let terminal = ExecutionOutcome {
                status,
                output: Some(outcome.output.clone()),
                error_message: outcome.error.clone(),
                return_code: Some(outcome.return_code),
                metadata: serde_json::Value::Object(outcome.metadata),
            };
            if let Err(e) = executor
                .executions
                .record_execution_end(execution_id, &terminal)
                .await
            {
                error!(%execution_id, "failed to close history row: {}", e);
            }

            info!(
                job = %record.name,
                %execution_id,
                status = %status,
                return_code = outcome.return_code,
                "execution finished"
            );

            Ok(ExecutionSummary::Completed {
                execution_id,
                status,
                output: Some(outcome.output),
                error_message: outcome.error,
                return_code: Some(outcome.return_code),
            })
        }
        Some(Err(e)) => {
            // The backend could not run at all; reify as a failed row
            warn!(job = %record.name, %execution_id, "backend error: {}", e);
            let terminal = ExecutionOutcome {
                status: ExecutionStatus::Failed,
                output: None,
                error_message: Some(e.to_string()),
                return_code: None,
                metadata: serde_json::json!({"error_category": e.category()}),
            };
            if let Err(write_err) = executor
                .executions
                .record_execution_end(execution_id, &terminal)
                .await
            {
                error!(%execution_id, "failed to close history row: {}", write_err);
            }
            Ok(ExecutionSummary::Completed {
                execution_id,
                status: ExecutionStatus::Failed,
                output: None,
                error_message: Some(e.to_string()),
                return_code: None,
            })
        }
    }
}
