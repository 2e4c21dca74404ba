//! Execution history persistence.
//!
//! Terminal writes are guarded in SQL: an UPDATE only matches non-terminal
//! rows, so concurrent finishers resolve to first-writer-wins and later
//! writers observe `already_terminal`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::Database;
use crate::models::{ExecutionFilter, ExecutionMode, ExecutionOutcome, ExecutionRecord};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct ExecutionRepository {
    db: Database,
}

/// Inputs for opening a history row
#[derive(Debug, Clone)]
pub struct StartExecution {
    pub job_id: Uuid,
    pub job_name: String,
    pub mode: ExecutionMode,
    pub executed_by: String,
    pub execution_timezone: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub metadata: serde_json::Value,
}

impl ExecutionRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a `running` row stamped with the server clock
    pub async fn record_execution_start(&self, start: StartExecution) -> Result<Uuid> {
        let execution_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO job_execution_history_v2 (
                execution_id, job_id, job_name, status, start_time,
                retry_count, max_retries, execution_mode, executed_by,
                execution_timezone, metadata
            )
            VALUES ($1, $2, $3, 'running', NOW(), $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution_id)
        .bind(start.job_id)
        .bind(&start.job_name)
        .bind(start.retry_count)
        .bind(start.max_retries)
        .bind(start.mode.as_str())
        .bind(&start.executed_by)
        .bind(&start.execution_timezone)
        .bind(&start.metadata)
        .execute(self.db.pool())
        .await?;

        Ok(execution_id)
    }

    /// The single terminal write. Refuses to touch a row that is already
    /// terminal; the losing writer gets `already_terminal`.
    pub async fn record_execution_end(
        &self,
        execution_id: Uuid,
        outcome: &ExecutionOutcome,
    ) -> Result<()> {
        if !outcome.status.is_terminal() {
            return Err(Error::validation(format!(
                "{} is not a terminal status",
                outcome.status
            )));
        }

        let result = sqlx::query(
            r#"
            UPDATE job_execution_history_v2
            SET status = $2,
                end_time = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - start_time)),
                output_log = $3,
                error_message = $4,
                return_code = $5,
                metadata = metadata || $6
            WHERE execution_id = $1
              AND status IN ('pending', 'running', 'queued', 'assigned')
            "#,
        )
        .bind(execution_id)
        .bind(outcome.status.as_str())
        .bind(&outcome.output)
        .bind(&outcome.error_message)
        .bind(outcome.return_code)
        .bind(&outcome.metadata)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(execution_id).await? {
                Some(_) => Err(Error::already_terminal(format!(
                    "Execution {} is already terminal",
                    execution_id
                ))),
                None => Err(Error::not_found(format!(
                    "Execution {} not found",
                    execution_id
                ))),
            };
        }

        Ok(())
    }

    /// Park a started row for agent pickup
    pub async fn mark_queued(&self, execution_id: Uuid) -> Result<()> {
        self.transition(execution_id, "queued", &["pending", "running"])
            .await
    }

    /// Record that an agent accepted the work
    pub async fn mark_assigned(&self, execution_id: Uuid) -> Result<()> {
        self.transition(execution_id, "assigned", &["queued"]).await
    }

    /// Requeue after a failed or revoked assignment
    pub async fn requeue(&self, execution_id: Uuid) -> Result<()> {
        self.transition(execution_id, "queued", &["assigned"]).await
    }

    async fn transition(
        &self,
        execution_id: Uuid,
        to: &str,
        from: &[&str],
    ) -> Result<()> {
        let from: Vec<String> = from.iter().map(|s| s.to_string()).collect();
        let result = sqlx::query(
            "UPDATE job_execution_history_v2 SET status = $2 \
             WHERE execution_id = $1 AND status = ANY($3)",
        )
        .bind(execution_id)
        .bind(to)
        .bind(&from)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get(execution_id).await? {
                Some(row) => Err(Error::already_terminal(format!(
                    "Execution {} cannot move from {} to {}",
                    execution_id, row.status, to
                ))),
                None => Err(Error::not_found(format!(
                    "Execution {} not found",
                    execution_id
                ))),
            };
        }
        Ok(())
    }

    /// Cancel a non-terminal execution. Idempotent: cancelling an already
    /// cancelled row succeeds silently.
    pub async fn cancel(&self, execution_id: Uuid, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_execution_history_v2
            SET status = 'cancelled',
                end_time = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - start_time)),
                error_message = $2
            WHERE execution_id = $1
              AND status IN ('pending', 'running', 'queued', 'assigned')
            "#,
        )
        .bind(execution_id)
        .bind(reason)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.get(execution_id).await? {
            Some(row) if row.status == "cancelled" => Ok(false),
            Some(row) => Err(Error::already_terminal(format!(
                "Execution {} is already {}",
                execution_id, row.status
            ))),
            None => Err(Error::not_found(format!(
                "Execution {} not found",
                execution_id
            ))),
        }
    }

    pub async fn get(&self, execution_id: Uuid) -> Result<Option<ExecutionRecord>> {
        let record = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM job_execution_history_v2 WHERE execution_id = $1",
        )
        .bind(execution_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    /// History listing, newest first
    pub async fn list(&self, filter: &ExecutionFilter) -> Result<Vec<ExecutionRecord>> {
        let limit = filter.limit.unwrap_or(100).clamp(1, 1000);

        let records = match (filter.job_id, filter.status) {
            (Some(job_id), Some(status)) => {
                sqlx::query_as::<_, ExecutionRecord>(
                    "SELECT * FROM job_execution_history_v2 \
                     WHERE job_id = $1 AND status = $2 ORDER BY start_time DESC LIMIT $3",
                )
                .bind(job_id)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            (Some(job_id), None) => {
                sqlx::query_as::<_, ExecutionRecord>(
                    "SELECT * FROM job_execution_history_v2 \
                     WHERE job_id = $1 ORDER BY start_time DESC LIMIT $2",
                )
                .bind(job_id)
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            (None, Some(status)) => {
                sqlx::query_as::<_, ExecutionRecord>(
                    "SELECT * FROM job_execution_history_v2 \
                     WHERE status = $1 ORDER BY start_time DESC LIMIT $2",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
            (None, None) => {
                sqlx::query_as::<_, ExecutionRecord>(
                    "SELECT * FROM job_execution_history_v2 ORDER BY start_time DESC LIMIT $1",
                )
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?
            }
        };

        Ok(records)
    }

    /// Non-terminal executions for a job; backs the single-instance guard
    pub async fn count_active(&self, job_id: Uuid) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM job_execution_history_v2 \
             WHERE job_id = $1 AND status IN ('pending', 'running', 'queued', 'assigned')",
        )
        .bind(job_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(count)
    }

    /// Executions waiting for agent placement, oldest first
    pub async fn list_queued(&self) -> Result<Vec<ExecutionRecord>> {
        let records = sqlx::query_as::<_, ExecutionRecord>(
            "SELECT * FROM job_execution_history_v2 \
             WHERE status = 'queued' ORDER BY start_time ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(records)
    }

    /// Merge intermediate agent progress into the metadata column
    pub async fn append_metadata(
        &self,
        execution_id: Uuid,
        patch: serde_json::Value,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE job_execution_history_v2 SET metadata = metadata || $2 \
             WHERE execution_id = $1",
        )
        .bind(execution_id)
        .bind(&patch)
        .execute(self.db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "Execution {} not found",
                execution_id
            )));
        }
        Ok(())
    }

    /// Retention pruning; only terminal rows are eligible
    pub async fn prune(
        &self,
        max_age_days: u32,
        max_rows_per_job: u32,
    ) -> Result<u64> {
        let mut removed = 0u64;

        if max_age_days > 0 {
            let cutoff: DateTime<Utc> =
                Utc::now() - chrono::Duration::days(max_age_days as i64);
            let result = sqlx::query(
                "DELETE FROM job_execution_history_v2 \
                 WHERE status IN ('success', 'failed', 'timeout', 'cancelled') \
                   AND start_time < $1",
            )
            .bind(cutoff)
            .execute(self.db.pool())
            .await?;
            removed += result.rows_affected();
        }

        if max_rows_per_job > 0 {
            let result = sqlx::query(
                r#"
                DELETE FROM job_execution_history_v2
                WHERE execution_id IN (
                    SELECT execution_id FROM (
                        SELECT execution_id,
                               ROW_NUMBER() OVER (
                                   PARTITION BY job_id ORDER BY start_time DESC
                               ) AS rn
                        FROM job_execution_history_v2
                        WHERE status IN ('success', 'failed', 'timeout', 'cancelled')
                    ) ranked
                    WHERE ranked.rn > $1
                )
                "#,
            )
            .bind(max_rows_per_job as i64)
            .execute(self.db.pool())
            .await?;
            removed += result.rows_affected();
        }

        Ok(removed)
    }
}
