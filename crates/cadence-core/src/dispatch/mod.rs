//! Agent dispatch: registry operations, the push-based assignment protocol,
//! and completion reconciliation.
//!
//! The scheduler initiates everything; agents are passive HTTP servers that
//! register, heartbeat, receive assignments, and report completion. Tokens
//! issued at registration authenticate every inbound agent call.

pub mod client;
pub mod sweeper;

pub use client::{AgentClient, AssignmentPayload};
pub use sweeper::{run_sweeper, SweepStats};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::models::{AgentRecord, Assignment, ExecutionOutcome, ExecutionStatus};
use crate::repository::{
    AgentRegistration, AgentRepository, ExecutionRepository, HeartbeatUpdate, JobRepository,
};
use crate::{Error, Result};

/// Registration body from an agent
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,

    #[serde(default = "default_pool")]
    pub pool_id: String,

    pub endpoint_url: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default = "default_capacity")]
    pub max_parallel_jobs: i32,

    #[serde(default)]
    pub os_info: Option<String>,

    #[serde(default)]
    pub cpu_count: Option<i32>,

    #[serde(default)]
    pub memory_mb: Option<i64>,

    #[serde(default)]
    pub disk_free_mb: Option<i64>,
}

fn default_pool() -> String {
    "default".to_string()
}

fn default_capacity() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub auth_token: String,
    pub heartbeat_interval_secs: u64,
}

/// Heartbeat body from an agent
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub active_jobs: Option<i32>,

    #[serde(default)]
    pub cpu_count: Option<i32>,

    #[serde(default)]
    pub memory_mb: Option<i64>,

    #[serde(default)]
    pub disk_free_mb: Option<i64>,
}

/// Intermediate progress report; touches metadata only
#[derive(Debug, Clone, Deserialize)]
pub struct StatusUpdateRequest {
    pub state: String,

    #[serde(default)]
    pub message: Option<String>,
}

/// Terminal report from an agent
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionReport {
    pub success: bool,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub return_code: Option<i32>,

    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Clone)]
pub struct AgentDispatcher {
    agents: AgentRepository,
    executions: ExecutionRepository,
    jobs: JobRepository,
    client: AgentClient,
    config: AgentConfig,

    /// Pinged whenever new queued work appears
    wakeup: Arc<Notify>,
}

impl AgentDispatcher {
    pub fn new(
        agents: AgentRepository,
        executions: ExecutionRepository,
        jobs: JobRepository,
        client: AgentClient,
        config: AgentConfig,
        wakeup: Arc<Notify>,
    ) -> Self {
        Self {
            agents,
            executions,
            jobs,
            client,
            config,
            wakeup,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    /// Register (or re-register) an agent and issue its auth token
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse> {
        if request.agent_id.trim().is_empty() {
            return Err(Error::validation("agent_id is required"));
        }
        if !request.endpoint_url.starts_with("http://")
            && !request.endpoint_url.starts_with("https://")
        {
            return Err(Error::validation("endpoint_url must be an http(s) URL"));
        }
        if request.max_parallel_jobs < 1 {
            return Err(Error::validation("max_parallel_jobs must be at least 1"));
        }

        let auth_token = generate_token();
        let registration = AgentRegistration {
            agent_id: request.agent_id.trim().to_string(),
            pool_id: request.pool_id,
            endpoint_url: request.endpoint_url.trim_end_matches('/').to_string(),
            capabilities: serde_json::to_value(&request.capabilities)?,
            max_parallel_jobs: request.max_parallel_jobs,
            os_info: request.os_info,
            cpu_count: request.cpu_count,
            memory_mb: request.memory_mb,
            disk_free_mb: request.disk_free_mb,
        };

        self.agents.upsert(&registration, &auth_token).await?;
        info!(
            agent = %registration.agent_id,
            pool = %registration.pool_id,
            "agent registered"
        );

        Ok(RegisterResponse {
            auth_token,
            heartbeat_interval_secs: self.config.heartbeat_interval_secs,
        })
    }

    /// Validate the bearer token an agent presented
    pub async fn verify_token(&self, agent_id: &str, token: &str) -> Result<AgentRecord> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Agent {} not registered", agent_id)))?;
        if agent.auth_token != token {
            return Err(Error::forbidden("Invalid agent token"));
        }
        Ok(agent)
    }

    pub async fn heartbeat(&self, request: HeartbeatRequest, token: &str) -> Result<()> {
        self.verify_token(&request.agent_id, token).await?;
        self.agents
            .heartbeat(
                &request.agent_id,
                &HeartbeatUpdate {
                    active_jobs: request.active_jobs,
                    cpu_count: request.cpu_count,
                    memory_mb: request.memory_mb,
                    disk_free_mb: request.disk_free_mb,
                    status: request.status,
                },
            )
            .await
    }

    /// Resolve an execution's assignment and check the caller's token
    async fn authorize_assignment(
        &self,
        execution_id: Uuid,
        token: &str,
    ) -> Result<(Assignment, AgentRecord)> {
        if self.executions.get(execution_id).await?.is_none() {
            return Err(Error::not_found(format!(
                "Execution {} not found",
                execution_id
            )));
        }
        let assignment = self
            .agents
            .assignment_for(execution_id)
            .await?
            .ok_or_else(|| {
                Error::not_found(format!("Execution {} has no assignment", execution_id))
            })?;
        let agent = self.verify_token(&assignment.agent_id, token).await?;
        Ok((assignment, agent))
    }

    /// Intermediate progress; metadata only, never the state machine
    pub async fn status_update(
        &self,
        execution_id: Uuid,
        request: StatusUpdateRequest,
        token: &str,
    ) -> Result<()> {
        let (_assignment, agent) = self.authorize_assignment(execution_id, token).await?;
        self.executions
            .append_metadata(
                execution_id,
                serde_json::json!({
                    "agent_state": request.state,
                    "agent_message": request.message,
                    "agent_id": agent.agent_id,
                }),
            )
            .await
    }

    /// Terminal report: close the row, release the assignment, free the slot
    pub async fn complete(
        &self,
        execution_id: Uuid,
        report: CompletionReport,
        token: &str,
    ) -> Result<ExecutionStatus> {
        let (_assignment, agent) = self.authorize_assignment(execution_id, token).await?;

        let status = if report.success {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };

        let outcome = ExecutionOutcome {
            status,
            output: report.output,
            error_message: report.error,
            return_code: Some(report.return_code.unwrap_or(if report.success { 0 } else { 1 })),
            metadata: serde_json::json!({
                "agent_id": agent.agent_id,
                "agent_logs": report.logs,
            }),
        };

        // First writer wins; a duplicate report surfaces already_terminal
        self.executions
            .record_execution_end(execution_id, &outcome)
            .await?;
        self.agents
            .release_assignment(execution_id, status.as_str(), report.success)
            .await?;

        info!(
            %execution_id,
            agent = %agent.agent_id,
            status = %status,
            "agent completion reconciled"
        );
        Ok(status)
    }

    /// Cancel a queued or assigned execution: best-effort revoke at the
    /// agent, then mark the row cancelled and free the slot. Idempotent.
    pub async fn cancel(&self, execution_id: Uuid, reason: &str) -> Result<bool> {
        if let Some(assignment) = self.agents.assignment_for(execution_id).await? {
            if assignment.is_live() {
                if let Some(agent) = self.agents.get(&assignment.agent_id).await? {
                    if let Err(e) = self
                        .client
                        .revoke(&agent.endpoint_url, &agent.auth_token, execution_id)
                        .await
                    {
                        warn!(
                            %execution_id,
                            agent = %agent.agent_id,
                            "revoke failed (continuing): {}", e
                        );
                    }
                }
                self.agents
                    .release_assignment(execution_id, "cancelled", false)
                    .await?;
            }
        }

        self.executions.cancel(execution_id, reason).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        self.agents.list().await
    }

    pub(crate) fn parts(
        &self,
    ) -> (
        &AgentRepository,
        &ExecutionRepository,
        &JobRepository,
        &AgentClient,
    ) {
        (&self.agents, &self.executions, &self.jobs, &self.client)
    }
}

/// 32 random bytes, hex-encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
