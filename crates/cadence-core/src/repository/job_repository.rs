//! Job persistence: the single source of truth for job definitions

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::Database;
use crate::models::{
    JobDefinition, JobFilter, JobFlatView, JobRecord, JobType, JOB_CONFIG_VERSION,
};
use crate::schedule::{IntervalSpec, ScheduleConfig};
use crate::validation::validate_job_payload;
use crate::{Error, Result};

/// A job plus everything derived from its blob
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub record: JobRecord,
    #[serde(skip)]
    pub definition: JobDefinition,
    pub flat: JobFlatView,
}

/// Create payload; either a full YAML blob or flat form fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub yaml_configuration: Option<String>,

    #[serde(default)]
    pub created_by: Option<String>,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub flat: FlatJobFields,
}

/// Update payload; a provided YAML blob wins over flat fields
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub yaml_configuration: Option<String>,

    #[serde(flatten)]
    pub flat: FlatJobFields,
}

/// The flat form fields accepted in place of a YAML blob. The store rebuilds
/// the blob deterministically from these.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FlatJobFields {
    #[serde(default)]
    pub job_type: Option<String>,

    #[serde(default)]
    pub script_content: Option<String>,

    #[serde(default)]
    pub script_path: Option<String>,

    #[serde(default)]
    pub execution_policy: Option<String>,

    #[serde(default)]
    pub parameters: Option<serde_json::Value>,

    #[serde(default)]
    pub working_directory: Option<String>,

    #[serde(default)]
    pub query: Option<String>,

    #[serde(default)]
    pub connection: Option<String>,

    #[serde(default)]
    pub max_rows: Option<usize>,

    #[serde(default)]
    pub agent_pool: Option<String>,

    #[serde(default)]
    pub schedule_type: Option<String>,

    #[serde(default)]
    pub cron_expression: Option<String>,

    #[serde(default)]
    pub interval: Option<IntervalSpec>,

    #[serde(default)]
    pub run_date: Option<String>,

    #[serde(default)]
    pub timezone: Option<String>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl FlatJobFields {
    pub fn is_empty(&self) -> bool {
        *self == FlatJobFields::default()
    }

    /// Rebuild the canonical YAML blob from flat form fields
    pub fn build_yaml(&self, name: &str) -> Result<String> {
        let schedule = match self.schedule_type.as_deref() {
            None => None,
            Some(schedule_type) => Some(ScheduleConfig {
                schedule_type: schedule_type.to_string(),
                expression: self.cron_expression.clone(),
                cron: None,
                interval: self.interval,
                run_date: self.run_date.clone(),
                timezone: self.timezone.clone().unwrap_or_else(|| "UTC".to_string()),
            }),
        };

        let mut definition = JobDefinition {
            name: Some(name.to_string()),
            job_type: self.job_type.clone(),
            inline_script: self.script_content.clone(),
            script_path: self.script_path.clone(),
            execution_policy: self.execution_policy.clone(),
            parameters: match &self.parameters {
                Some(value) => Some(
                    serde_yaml::to_value(value).map_err(Error::Yaml)?,
                ),
                None => None,
            },
            working_directory: self.working_directory.clone(),
            query: self.query.clone(),
            connection: self.connection.clone(),
            max_rows: self.max_rows,
            agent_pool: self.agent_pool.clone(),
            execution_strategy: None,
            steps: None,
            schedule,
            timeout: self.timeout,
            max_retries: self.max_retries,
            retry_delay: None,
            retry_on_timeout: false,
        };
        definition.canonicalize_parameters()?;

        definition.to_yaml().map_err(Error::Yaml)
    }
}

#[derive(Debug, Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new job. The YAML blob is stored verbatim; when only flat
    /// fields are given the blob is built from them first.
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Uuid> {
        let yaml = match request.yaml_configuration {
            Some(yaml) => yaml,
            None => request.flat.build_yaml(&request.name)?,
        };

        validate_job_payload(&request.name, &yaml)?;

        let job_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO job_configurations_v2 (
                job_id, name, description, version, yaml_configuration,
                enabled, created_date, modified_date, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW(), $7)
            "#,
        )
        .bind(job_id)
        .bind(request.name.trim())
        .bind(&request.description)
        .bind(JOB_CONFIG_VERSION)
        .bind(&yaml)
        .bind(request.enabled.unwrap_or(true))
        .bind(request.created_by.as_deref().unwrap_or("system"))
        .execute(self.db.pool())
        .await?;

        Ok(job_id)
    }

    /// Fetch the raw record plus parsed and flattened views. Malformed blobs
    /// flatten to defaults with `job_type = "unknown"` rather than erroring.
    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<JobDetails>> {
        let record = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM job_configurations_v2 WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(record.map(|record| {
            let definition = record.definition();
            let flat = JobFlatView::build(&record, &definition);
            JobDetails {
                record,
                definition,
                flat,
            }
        }))
    }

    pub async fn get_record(&self, job_id: Uuid) -> Result<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM job_configurations_v2 WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(record)
    }

    /// List jobs, newest first. The type filter operates on the parsed YAML,
    /// not a stored column.
    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<JobRecord>> {
        let records = if filter.enabled_only {
            sqlx::query_as::<_, JobRecord>(
                "SELECT * FROM job_configurations_v2 WHERE enabled = TRUE ORDER BY created_date DESC",
            )
            .fetch_all(self.db.pool())
            .await?
        } else {
            sqlx::query_as::<_, JobRecord>(
                "SELECT * FROM job_configurations_v2 ORDER BY created_date DESC",
            )
            .fetch_all(self.db.pool())
            .await?
        };

        let mut records: Vec<JobRecord> = match filter.job_type {
            Some(job_type) => records
                .into_iter()
                .filter(|r| r.definition().job_type() == job_type)
                .collect(),
            None => records,
        };

        if let Some(limit) = filter.limit {
            records.truncate(limit.max(0) as usize);
        }

        Ok(records)
    }

    /// Enabled jobs that carry a schedule block; what the loop evaluates
    pub async fn list_schedulable(&self) -> Result<Vec<JobRecord>> {
        let records = self
            .list_jobs(&JobFilter {
                enabled_only: true,
                ..Default::default()
            })
            .await?;
        Ok(records
            .into_iter()
            .filter(|r| r.definition().schedule.is_some())
            .collect())
    }

    /// Update a job from a full blob or flat form fields
    pub async fn update_job(&self, job_id: Uuid, request: UpdateJobRequest) -> Result<()> {
        let existing = self
            .get_record(job_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)))?;

        let name = request.name.clone().unwrap_or_else(|| existing.name.clone());

        let yaml = if let Some(yaml) = &request.yaml_configuration {
            yaml.clone()
        } else if !request.flat.is_empty() {
            request.flat.build_yaml(&name)?
        } else {
            existing.yaml_configuration.clone()
        };

        validate_job_payload(&name, &yaml)?;

        sqlx::query(
            r#"
            UPDATE job_configurations_v2
            SET name = $2,
                description = COALESCE($3, description),
                yaml_configuration = $4,
                enabled = COALESCE($5, enabled),
                modified_date = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(&name)
        .bind(&request.description)
        .bind(&yaml)
        .bind(request.enabled)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Remove the definition; execution history rows are retained
    pub async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM job_configurations_v2 WHERE job_id = $1")
            .bind(job_id)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("Job {} not found", job_id)));
        }
        Ok(())
    }

    /// Set enabled to the given value, or flip it when unspecified
    pub async fn toggle_job(&self, job_id: Uuid, enabled: Option<bool>) -> Result<bool> {
        let row: Option<(bool,)> = match enabled {
            Some(value) => sqlx::query_as(
                "UPDATE job_configurations_v2 SET enabled = $2, modified_date = NOW() \
                 WHERE job_id = $1 RETURNING enabled",
            )
            .bind(job_id)
            .bind(value)
            .fetch_optional(self.db.pool())
            .await?,
            None => sqlx::query_as(
                "UPDATE job_configurations_v2 SET enabled = NOT enabled, modified_date = NOW() \
                 WHERE job_id = $1 RETURNING enabled",
            )
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?,
        };

        row.map(|(enabled,)| enabled)
            .ok_or_else(|| Error::not_found(format!("Job {} not found", job_id)))
    }
}
