//! Job definitions: the persisted record, the parsed YAML configuration and
//! the flattened view served to the API layer.
//!
//! The YAML blob is the only persisted shape; everything parsed from it is a
//! pure function of the blob and must never diverge from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::schedule::ScheduleConfig;

pub const JOB_CONFIG_VERSION: &str = "2.0";

/// Job type resolved from the YAML `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    PowerShell,
    Sql,
    AgentJob,
    Unknown,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PowerShell => "powershell",
            JobType::Sql => "sql",
            JobType::AgentJob => "agent_job",
            JobType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "powershell" => JobType::PowerShell,
            "sql" => JobType::Sql,
            "agent_job" => JobType::AgentJob,
            _ => JobType::Unknown,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable job row, as stored in `job_configurations_v2`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub yaml_configuration: String,
    pub enabled: bool,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub created_by: String,
}

impl JobRecord {
    /// Parse the YAML blob. Malformed YAML yields the unknown-typed default
    /// rather than an error; read paths must not fail on bad blobs.
    pub fn definition(&self) -> JobDefinition {
        JobDefinition::parse(&self.yaml_configuration).unwrap_or_default()
    }

    /// Strict parse for write paths
    pub fn try_definition(&self) -> crate::Result<JobDefinition> {
        JobDefinition::parse(&self.yaml_configuration).map_err(crate::Error::Yaml)
    }
}

/// One step of an agent job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    pub name: String,

    /// `powershell`, `cmd` or `python`
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Parsed job configuration. Field order is the canonical YAML rendering
/// order; `to_yaml` relies on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,

    // PowerShell fields
    #[serde(rename = "inlineScript", default, skip_serializing_if = "Option::is_none")]
    pub inline_script: Option<String>,

    #[serde(rename = "scriptPath", default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,

    #[serde(
        rename = "executionPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub execution_policy: Option<String>,

    /// Accepts three shapes: array of `{name, value}` maps, array of
    /// `"name=value"` strings, or a single map. The canonical stored form is
    /// the array of maps; see [`JobDefinition::parameters`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_yaml::Value>,

    #[serde(
        rename = "workingDirectory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub working_directory: Option<String>,

    // SQL fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,

    // Agent fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_pool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<AgentStep>>,

    // Scheduling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    // Retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub retry_on_timeout: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl JobDefinition {
    pub fn parse(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Deterministic canonical rendering; `parse(to_yaml(d)) == d`
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
            .as_deref()
            .map(JobType::parse)
            .unwrap_or(JobType::Unknown)
    }

    pub fn timeout_secs(&self, default: u64) -> u64 {
        self.timeout.unwrap_or(default)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(0)
    }

    /// Normalize the accepted parameter shapes into the canonical list
    pub fn normalized_parameters(&self) -> crate::Result<Vec<PsParameter>> {
        let Some(value) = &self.parameters else {
            return Ok(Vec::new());
        };
        normalize_parameters(value)
    }

    /// Canonicalize `parameters` in place (array-of-maps stored form)
    pub fn canonicalize_parameters(&mut self) -> crate::Result<()> {
        let params = self.normalized_parameters()?;
        if params.is_empty() {
            self.parameters = None;
        } else {
            self.parameters = Some(
                serde_yaml::to_value(&params).map_err(crate::Error::Yaml)?,
            );
        }
        Ok(())
    }
}

/// A named PowerShell parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PsParameter {
    pub name: String,
    pub value: String,
}

fn yaml_scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn normalize_parameters(value: &serde_yaml::Value) -> crate::Result<Vec<PsParameter>> {
    use crate::Error;

    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(items) => {
            let mut params = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_yaml::Value::Mapping(map) => {
                        let name = map
                            .get(serde_yaml::Value::String("name".into()))
                            .map(yaml_scalar_to_string)
                            .filter(|n| !n.is_empty())
                            .ok_or_else(|| {
                                Error::validation("Parameter entry is missing 'name'")
                            })?;
                        let value = map
                            .get(serde_yaml::Value::String("value".into()))
                            .map(yaml_scalar_to_string)
                            .unwrap_or_default();
                        params.push(PsParameter { name, value });
                    }
                    serde_yaml::Value::String(s) => {
                        let (name, value) = s.split_once('=').ok_or_else(|| {
                            Error::validation(format!(
                                "Parameter '{}' is not in name=value form",
                                s
                            ))
                        })?;
                        if name.is_empty() {
                            return Err(Error::validation(format!(
                                "Parameter '{}' has an empty name",
                                s
                            )));
                        }
                        params.push(PsParameter {
                            name: name.to_string(),
                            value: value.to_string(),
                        });
                    }
                    other => {
                        return Err(Error::validation(format!(
                            "Unsupported parameter entry: {:?}",
                            other
                        )))
                    }
                }
            }
            Ok(params)
        }
        serde_yaml::Value::Mapping(map) => {
            let mut params: Vec<PsParameter> = map
                .iter()
                .map(|(k, v)| PsParameter {
                    name: yaml_scalar_to_string(k),
                    value: yaml_scalar_to_string(v),
                })
                .collect();
            // Mapping order is not meaningful in YAML; sort for determinism
            params.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(params)
        }
        other => Err(Error::validation(format!(
            "Unsupported parameters shape: {:?}",
            other
        ))),
    }
}

/// Flattened convenience view for the API layer. Derived from the record and
/// its parsed definition; preserves YAML semantics exactly.
#[derive(Debug, Clone, Serialize)]
pub struct JobFlatView {
    pub job_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub enabled: bool,
    pub job_type: String,
    pub created_date: DateTime<Utc>,
    pub modified_date: DateTime<Utc>,
    pub created_by: String,

    pub schedule_type: Option<String>,
    pub timezone: Option<String>,
    pub cron_expression: Option<String>,
    pub interval: Option<serde_json::Value>,
    pub run_date: Option<String>,

    pub script_content: Option<String>,
    pub script_path: Option<String>,
    pub execution_policy: Option<String>,
    pub working_directory: Option<String>,

    pub query: Option<String>,
    pub connection: Option<String>,
    pub max_rows: Option<usize>,

    pub agent_pool: Option<String>,
    pub execution_strategy: Option<String>,
    pub step_count: usize,

    pub timeout: Option<u64>,
    pub max_retries: u32,
}

impl JobFlatView {
    pub fn build(record: &JobRecord, definition: &JobDefinition) -> Self {
        let schedule = definition.schedule.as_ref();
        Self {
            job_id: record.job_id,
            name: record.name.clone(),
            description: record.description.clone(),
            version: record.version.clone(),
            enabled: record.enabled,
            job_type: definition.job_type().as_str().to_string(),
            created_date: record.created_date,
            modified_date: record.modified_date,
            created_by: record.created_by.clone(),

            schedule_type: schedule.map(|s| s.schedule_type.clone()),
            timezone: schedule.map(|s| s.timezone.clone()),
            cron_expression: schedule.and_then(|s| s.expression()),
            interval: schedule
                .and_then(|s| s.interval.as_ref())
                .and_then(|i| serde_json::to_value(i).ok()),
            run_date: schedule.and_then(|s| s.run_date.clone()),

            script_content: definition.inline_script.clone(),
            script_path: definition.script_path.clone(),
            execution_policy: definition.execution_policy.clone(),
            working_directory: definition.working_directory.clone(),

            query: definition.query.clone(),
            connection: definition.connection.clone(),
            max_rows: definition.max_rows,

            agent_pool: definition.agent_pool.clone(),
            execution_strategy: definition.execution_strategy.clone(),
            step_count: definition.steps.as_ref().map(Vec::len).unwrap_or(0),

            timeout: definition.timeout,
            max_retries: definition.max_retries(),
        }
    }
}

/// Filter for job listings
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub enabled_only: bool,
    pub job_type: Option<JobType>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PS_YAML: &str = r#"
name: nightly-cleanup
type: powershell
inlineScript: |
  Write-Host "cleaning"
executionPolicy: RemoteSigned
parameters:
  - name: Depth
    value: "3"
schedule:
  type: cron
  expression: "0 0 2 * * *"
  timezone: America/Chicago
timeout: 600
"#;

    #[test]
    fn test_parse_powershell_definition() {
        let def = JobDefinition::parse(PS_YAML).unwrap();
        assert_eq!(def.job_type(), JobType::PowerShell);
        assert!(def.inline_script.as_deref().unwrap().contains("cleaning"));
        assert_eq!(def.execution_policy.as_deref(), Some("RemoteSigned"));
        assert_eq!(def.timeout_secs(300), 600);

        let schedule = def.schedule.as_ref().unwrap();
        assert_eq!(schedule.schedule_type, "cron");
        assert_eq!(schedule.expression().as_deref(), Some("0 0 2 * * *"));
        assert_eq!(schedule.timezone, "America/Chicago");
    }

    #[test]
    fn test_malformed_yaml_falls_back_to_unknown() {
        let record = JobRecord {
            job_id: Uuid::new_v4(),
            name: "broken".into(),
            description: None,
            version: JOB_CONFIG_VERSION.into(),
            yaml_configuration: ": not valid : yaml : [".into(),
            enabled: true,
            created_date: Utc::now(),
            modified_date: Utc::now(),
            created_by: "tests".into(),
        };
        let def = record.definition();
        assert_eq!(def.job_type(), JobType::Unknown);
        let view = JobFlatView::build(&record, &def);
        assert_eq!(view.job_type, "unknown");
    }

    #[test]
    fn test_parameter_shapes() {
        // Array of maps
        let def = JobDefinition::parse(
            "type: powershell\nparameters:\n  - name: A\n    value: one\n  - name: B\n    value: 2\n",
        )
        .unwrap();
        let params = def.normalized_parameters().unwrap();
        assert_eq!(
            params,
            vec![
                PsParameter { name: "A".into(), value: "one".into() },
                PsParameter { name: "B".into(), value: "2".into() },
            ]
        );

        // Array of name=value strings
        let def =
            JobDefinition::parse("type: powershell\nparameters:\n  - A=one\n  - B=2\n").unwrap();
        assert_eq!(def.normalized_parameters().unwrap(), params);

        // Single mapping
        let def =
            JobDefinition::parse("type: powershell\nparameters:\n  A: one\n  B: 2\n").unwrap();
        assert_eq!(def.normalized_parameters().unwrap(), params);
    }

    #[test]
    fn test_bad_parameter_shapes_rejected() {
        let def =
            JobDefinition::parse("type: powershell\nparameters:\n  - just-a-token\n").unwrap();
        assert!(def.normalized_parameters().is_err());

        let def = JobDefinition::parse("type: powershell\nparameters: 42\n").unwrap();
        assert!(def.normalized_parameters().is_err());
    }

    #[test]
    fn test_yaml_round_trip() {
        let def = JobDefinition::parse(PS_YAML).unwrap();
        let rendered = def.to_yaml().unwrap();
        let reparsed = JobDefinition::parse(&rendered).unwrap();
        assert_eq!(def, reparsed);
    }

    #[test]
    fn test_canonicalize_parameters() {
        let mut def =
            JobDefinition::parse("type: powershell\nparameters:\n  - B=2\n  - A=one\n").unwrap();
        def.canonicalize_parameters().unwrap();
        let rendered = def.to_yaml().unwrap();
        assert!(rendered.contains("name: B"));
        let reparsed = JobDefinition::parse(&rendered).unwrap();
        assert_eq!(
            reparsed.normalized_parameters().unwrap(),
            def.normalized_parameters().unwrap()
        );
    }

    #[test]
    fn test_agent_definition() {
        let yaml = r#"
type: agent_job
agent_pool: default
execution_strategy: default_pool
steps:
  - name: fetch
    action: powershell
    script: Write-Host fetch
    timeout: 120
  - name: convert
    action: python
    script: print("convert")
"#;
        let def = JobDefinition::parse(yaml).unwrap();
        assert_eq!(def.job_type(), JobType::AgentJob);
        let steps = def.steps.as_ref().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, "powershell");
        assert_eq!(steps[1].name, "convert");
    }
}
