//! Agent registry and assignment persistence

use std::time::Duration;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{AgentRecord, Assignment};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct AgentRepository {
    db: Database,
}

/// Facts an agent declares at registration
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub agent_id: String,
    pub pool_id: String,
    pub endpoint_url: String,
    pub capabilities: serde_json::Value,
    pub max_parallel_jobs: i32,
    pub os_info: Option<String>,
    pub cpu_count: Option<i32>,
    pub memory_mb: Option<i64>,
    pub disk_free_mb: Option<i64>,
}

/// Telemetry carried on a heartbeat
#[derive(Debug, Clone, Default)]
pub struct HeartbeatUpdate {
    pub active_jobs: Option<i32>,
    pub cpu_count: Option<i32>,
    pub memory_mb: Option<i64>,
    pub disk_free_mb: Option<i64>,
    pub status: Option<String>,
}

impl AgentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register or re-register; a prior record for the id is replaced
    pub async fn upsert(&self, reg: &AgentRegistration, auth_token: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_registry (
                agent_id, pool_id, endpoint_url, capabilities, max_parallel_jobs,
                os_info, cpu_count, memory_mb, disk_free_mb, auth_token,
                status, active_jobs, registered_at, last_heartbeat_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'online', 0, NOW(), NOW())
            ON CONFLICT (agent_id) DO UPDATE SET
                pool_id = EXCLUDED.pool_id,
                endpoint_url = EXCLUDED.endpoint_url,
                capabilities = EXCLUDED.capabilities,
                max_parallel_jobs = EXCLUDED.max_parallel_jobs,
                os_info = EXCLUDED.os_info,
                cpu_count = EXCLUDED.cpu_count,
                memory_mb = EXCLUDED.memory_mb,
                disk_free_mb = EXCLUDED.disk_free_mb,
                auth_token = EXCLUDED.auth_token,
                status = 'online',
                active_jobs = 0,
                registered_at = NOW(),
                last_heartbeat_at = NOW()
            "#,
        )
        .bind(&reg.agent_id)
        .bind(&reg.pool_id)
        .bind(&reg.endpoint_url)
        .bind(&reg.capabilities)
        .bind(reg.max_parallel_jobs)
        .bind(&reg.os_info)
        .bind(reg.cpu_count)
        .bind(reg.memory_mb)
        .bind(reg.disk_free_mb)
        .bind(auth_token)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    pub async fn get(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let record =
            sqlx::query_as::<_, AgentRecord>("SELECT * FROM agent_registry WHERE agent_id = $1")
                .bind(agent_id)
                .fetch_optional(self.db.pool())
                .await?;
        Ok(record)
    }

    pub async fn list(&self) -> Result<Vec<AgentRecord>> {
        let records =
            sqlx::query_as::<_, AgentRecord>("SELECT * FROM agent_registry ORDER BY agent_id")
                .fetch_all(self.db.pool())
                .await?;
        Ok(records)
    }

    /// Stamp a heartbeat and absorb telemetry
    pub async fn heartbeat(&self, agent_id: &str, update: &HeartbeatUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agent_registry
            SET last_heartbeat_at = NOW(),
                status = COALESCE($2, 'online'),
                active_jobs = COALESCE($3, active_jobs),
                cpu_count = COALESCE($4, cpu_count),
                memory_mb = COALESCE($5, memory_mb),
                disk_free_mb = COALESCE($6, disk_free_mb)
            WHERE agent_id = $1
            "#,
        )
        .bind(agent_id)
        .bind(&update.status)
        .bind(update.active_jobs)
        .bind(update.cpu_count)
        .bind(update.memory_mb)
        .bind(update.disk_free_mb)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Agent {} not registered", agent_id)));
        }
        Ok(())
    }

    /// Declare agents offline once their heartbeat is older than the window
    pub async fn mark_stale_offline(&self, window: Duration) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE agent_registry SET status = 'offline' \
             WHERE status <> 'offline' \
               AND last_heartbeat_at < NOW() - make_interval(secs => $1)",
        )
        .bind(window.as_secs_f64())
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Placement candidates: online within the heartbeat window, in the
    /// requested pool (or any), with spare capacity. Ordered by fewest active
    /// jobs, then least-recently-assigned.
    pub async fn candidates(
        &self,
        pool: Option<&str>,
        window: Duration,
    ) -> Result<Vec<AgentRecord>> {
        let records = sqlx::query_as::<_, AgentRecord>(
            r#"
            SELECT * FROM agent_registry
            WHERE status = 'online'
              AND last_heartbeat_at >= NOW() - make_interval(secs => $1)
              AND active_jobs < max_parallel_jobs
              AND ($2::varchar IS NULL OR pool_id = $2)
            ORDER BY active_jobs ASC, last_assigned_at ASC NULLS FIRST
            "#,
        )
        .bind(window.as_secs_f64())
        .bind(pool)
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    /// Record a successful hand-off and charge the agent a slot
    pub async fn record_assignment(&self, execution_id: Uuid, agent_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_assignments (execution_id, agent_id, assigned_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (execution_id) DO UPDATE SET
                agent_id = EXCLUDED.agent_id,
                assigned_at = NOW(),
                completed_at = NULL,
                outcome = NULL
            "#,
        )
        .bind(execution_id)
        .bind(agent_id)
        .execute(self.db.pool())
        .await?;

        sqlx::query(
            "UPDATE agent_registry \
             SET active_jobs = active_jobs + 1, last_assigned_at = NOW() \
             WHERE agent_id = $1",
        )
        .bind(agent_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Close the assignment and free the agent's slot. Returns the agent id
    /// the execution was assigned to, if any.
    pub async fn release_assignment(
        &self,
        execution_id: Uuid,
        outcome: &str,
        success: bool,
    ) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE agent_assignments SET completed_at = NOW(), outcome = $2 \
             WHERE execution_id = $1 AND completed_at IS NULL RETURNING agent_id",
        )
        .bind(execution_id)
        .bind(outcome)
        .fetch_optional(self.db.pool())
        .await?;

        let Some((agent_id,)) = row else {
            return Ok(None);
        };

        let counter = if success {
            "jobs_completed = jobs_completed + 1"
        } else {
            "jobs_failed = jobs_failed + 1"
        };
        let sql = format!(
            "UPDATE agent_registry SET active_jobs = GREATEST(active_jobs - 1, 0), {} \
             WHERE agent_id = $1",
            counter
        );
        sqlx::query(&sql)
            .bind(&agent_id)
            .execute(self.db.pool())
            .await?;

        Ok(Some(agent_id))
    }

    pub async fn assignment_for(&self, execution_id: Uuid) -> Result<Option<Assignment>> {
        let row = sqlx::query_as::<_, Assignment>(
            "SELECT * FROM agent_assignments WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Live assignments whose agent has stopped heartbeating; orphan input
    pub async fn orphaned_assignments(&self, window: Duration) -> Result<Vec<Assignment>> {
        let rows = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT a.* FROM agent_assignments a
            JOIN agent_registry r ON r.agent_id = a.agent_id
            WHERE a.completed_at IS NULL
              AND r.last_heartbeat_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(window.as_secs_f64())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }
}
