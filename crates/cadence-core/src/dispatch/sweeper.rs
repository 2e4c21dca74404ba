//! Background reconciliation: places queued work on agents, declares stale
//! agents offline, and fails assignments whose agent went silent.

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AgentDispatcher, AssignmentPayload};
use crate::models::{ExecutionOutcome, ExecutionStatus};
use crate::Result;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub agents_marked_offline: u64,
    pub orphans_failed: usize,
    pub placed: usize,
    pub still_queued: usize,
}

impl AgentDispatcher {
    /// One reconciliation pass; each phase is independent and best-effort
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let (agents, executions, jobs, client) = self.parts();
        let mut stats = SweepStats::default();

        // 1. Heartbeat bookkeeping
        stats.agents_marked_offline = agents
            .mark_stale_offline(self.config().offline_window())
            .await?;
        if stats.agents_marked_offline > 0 {
            warn!(
                count = stats.agents_marked_offline,
                "agents declared offline on missed heartbeats"
            );
        }

        // 2. Orphaned assignments: assigned work whose agent went silent
        for assignment in agents
            .orphaned_assignments(self.config().orphan_window())
            .await?
        {
            let execution_id = assignment.execution_id;
            let outcome = ExecutionOutcome {
                status: ExecutionStatus::Failed,
                output: None,
                error_message: Some(format!(
                    "Agent lost: no heartbeat from '{}' within the orphan window",
                    assignment.agent_id
                )),
                return_code: None,
                metadata: serde_json::json!({
                    "agent_id": assignment.agent_id,
                    "failure": "agent_lost",
                }),
            };
            match executions.record_execution_end(execution_id, &outcome).await {
                Ok(()) => {
                    stats.orphans_failed += 1;
                    warn!(%execution_id, agent = %assignment.agent_id, "assignment orphaned; execution failed");
                }
                Err(e) if e.category() == "already_terminal" => {
                    // A late completion won the race; just release below
                    debug!(%execution_id, "orphan candidate already terminal");
                }
                Err(e) => {
                    error!(%execution_id, "failed to close orphaned execution: {}", e);
                    continue;
                }
            }
            if let Err(e) = agents
                .release_assignment(execution_id, "agent_lost", false)
                .await
            {
                error!(%execution_id, "failed to release orphaned assignment: {}", e);
            }
        }

        // 3. Placement of queued work
        for execution in executions.list_queued().await? {
            let execution_id = execution.execution_id;

            let Some(job) = jobs.get_record(execution.job_id).await? else {
                // Definition is gone; nothing an agent could run
                if let Err(e) = executions
                    .cancel(execution_id, "Job definition removed while queued")
                    .await
                {
                    warn!(%execution_id, "could not cancel orphan queue entry: {}", e);
                }
                continue;
            };

            let pool = execution
                .metadata
                .get("agent_pool")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let candidates = agents
                .candidates(pool.as_deref(), self.config().offline_window())
                .await?;
            if candidates.is_empty() {
                stats.still_queued += 1;
                continue;
            }

            let payload = AssignmentPayload {
                execution_id,
                job_id: job.job_id,
                job_name: job.name.clone(),
                yaml_configuration: job.yaml_configuration.clone(),
                callback_token: String::new(),
            };

            let mut placed = false;
            for candidate in candidates {
                let payload = AssignmentPayload {
                    callback_token: candidate.auth_token.clone(),
                    ..payload.clone()
                };
                match client
                    .assign(&candidate.endpoint_url, &candidate.auth_token, &payload)
                    .await
                {
                    Ok(()) => {
                        // A concurrent sweep may have won the row meanwhile
                        if let Err(e) = executions.mark_assigned(execution_id).await {
                            warn!(%execution_id, "lost placement race: {}", e);
                            placed = true;
                            break;
                        }
                        agents
                            .record_assignment(execution_id, &candidate.agent_id)
                            .await?;
                        info!(
                            %execution_id,
                            agent = %candidate.agent_id,
                            job = %job.name,
                            "execution assigned"
                        );
                        stats.placed += 1;
                        placed = true;
                        break;
                    }
                    Err(e) => {
                        // Stays queued; the next candidate (or sweep) retries
                        warn!(
                            %execution_id,
                            agent = %candidate.agent_id,
                            "assignment attempt failed: {}", e
                        );
                    }
                }
            }
            if !placed {
                stats.still_queued += 1;
            }
        }

        Ok(stats)
    }
}

/// Periodic sweeper task; also woken immediately when new work queues up
pub async fn run_sweeper(dispatcher: AgentDispatcher, shutdown: CancellationToken) {
    let interval = dispatcher.config().sweep_interval();
    let wakeup = dispatcher.wakeup();
    info!(interval_secs = interval.as_secs(), "dispatch sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wakeup.notified() => {}
            _ = shutdown.cancelled() => break,
        }

        match dispatcher.sweep_once().await {
            Ok(stats) => {
                if stats.placed > 0 || stats.orphans_failed > 0 {
                    info!(
                        placed = stats.placed,
                        orphaned = stats.orphans_failed,
                        waiting = stats.still_queued,
                        "sweep completed"
                    );
                }
            }
            Err(e) => error!("sweep failed: {}", e),
        }
    }

    info!("dispatch sweeper stopped");
}
