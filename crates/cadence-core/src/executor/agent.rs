//! Agent backend: the execution is handed off, not run inline. The row moves
//! to `queued` and the dispatch sweeper owns the rest of the lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BackendOutcome, ExecutionBackend, ExecutionContext};
use crate::repository::ExecutionRepository;
use crate::{Error, Result};

#[derive(Clone)]
pub struct AgentBackend {
    executions: ExecutionRepository,
    dispatch_wakeup: Arc<Notify>,
}

impl AgentBackend {
    pub fn new(executions: ExecutionRepository, dispatch_wakeup: Arc<Notify>) -> Self {
        Self {
            executions,
            dispatch_wakeup,
        }
    }
}

#[async_trait]
impl ExecutionBackend for AgentBackend {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<BackendOutcome> {
        let definition = &ctx.definition;
        if definition.steps.as_ref().map(Vec::is_empty).unwrap_or(true) {
            return Err(Error::validation("Agent job requires at least one step"));
        }

        let pool = definition.agent_pool.clone();

        // Park the row for placement; the pool travels in metadata so the
        // sweeper can route without reparsing the blob
        self.executions.mark_queued(ctx.execution_id).await?;
        self.executions
            .append_metadata(
                ctx.execution_id,
                serde_json::json!({
                    "agent_pool": pool,
                    "step_count": definition.steps.as_ref().map(Vec::len).unwrap_or(0),
                }),
            )
            .await?;

        // Wake the sweeper so placement is attempted immediately
        self.dispatch_wakeup.notify_one();

        let pool_name = pool.as_deref().unwrap_or("any");
        Ok(BackendOutcome {
            success: true,
            output: format!("Queued for agent pool '{}'", pool_name),
            error: None,
            return_code: 0,
            terminal_now: false,
            timed_out: false,
            metadata: serde_json::Map::new(),
        })
    }
}
