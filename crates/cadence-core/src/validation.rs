//! Payload validation for user-created jobs.
//!
//! Runs at create/update time only; execution paths trust what was stored.

use chrono::Utc;

use crate::models::{JobDefinition, JobType};
use crate::schedule::{validate_schedule, ValidationStatus};
use crate::{Error, Result};

pub const MAX_JOB_NAME_LEN: usize = 100;

/// Characters that are never allowed in a job name
const INVALID_NAME_CHARS: &str = "<>:\"/\\|?*";

/// SQL keywords rejected in user-created SQL jobs
const DANGEROUS_SQL_KEYWORDS: &[&str] = &[
    "DROP",
    "DELETE",
    "TRUNCATE",
    "ALTER",
    "CREATE",
    "INSERT",
    "UPDATE",
    "EXEC",
    "EXECUTE",
    "SP_",
    "XP_",
    "OPENQUERY",
    "OPENROWSET",
];

/// PowerShell commands that are flagged but not rejected
const RISKY_POWERSHELL_COMMANDS: &[&str] = &[
    "Remove-Item",
    "Format-Volume",
    "Stop-Computer",
    "Restart-Computer",
    "Invoke-Expression",
    "Set-ExecutionPolicy",
];

/// Validate a job name: non-empty, bounded, free of path/control characters
pub fn validate_job_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("Job name cannot be empty"));
    }
    if name.len() > MAX_JOB_NAME_LEN {
        return Err(Error::validation(format!(
            "Job name must be at most {} characters",
            MAX_JOB_NAME_LEN
        )));
    }
    if name
        .chars()
        .any(|c| INVALID_NAME_CHARS.contains(c) || (c as u32) < 0x20)
    {
        return Err(Error::validation("Job name contains invalid characters"));
    }
    Ok(())
}

/// Reject queries containing statements the scheduler refuses to run for
/// user-created jobs. Matching is deliberately coarse (uppercase substring),
/// mirroring what operators expect from a deny-list.
pub fn validate_sql_query(query: &str) -> Result<()> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::validation("SQL query is required"));
    }

    let upper = query.to_uppercase();
    for keyword in DANGEROUS_SQL_KEYWORDS {
        if upper.contains(keyword) {
            return Err(Error::validation(format!(
                "Potentially dangerous SQL keyword detected: {}",
                keyword.trim_end_matches('_')
            )));
        }
    }

    if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
        return Err(Error::validation("Only SELECT queries are allowed"));
    }

    Ok(())
}

/// Flag risky PowerShell commands without rejecting the job
pub fn powershell_warnings(script: &str) -> Vec<String> {
    RISKY_POWERSHELL_COMMANDS
        .iter()
        .filter(|cmd| script.to_lowercase().contains(&cmd.to_lowercase()))
        .map(|cmd| format!("Potentially dangerous PowerShell command detected: {}", cmd))
        .collect()
}

/// Full payload validation for create/update. Returns the definition so
/// callers parse the blob exactly once.
pub fn validate_job_payload(name: &str, yaml: &str) -> Result<JobDefinition> {
    validate_job_name(name)?;

    let definition = JobDefinition::parse(yaml).map_err(Error::Yaml)?;

    match definition.job_type() {
        JobType::PowerShell => {
            if definition.inline_script.is_none() && definition.script_path.is_none() {
                return Err(Error::validation(
                    "PowerShell job requires inlineScript or scriptPath",
                ));
            }
            // Shape errors surface at create time, not at fire time
            definition.normalized_parameters()?;
        }
        JobType::Sql => {
            let query = definition
                .query
                .as_deref()
                .ok_or_else(|| Error::validation("SQL job requires a query"))?;
            validate_sql_query(query)?;
        }
        JobType::AgentJob => {
            let steps = definition
                .steps
                .as_deref()
                .unwrap_or(&[]);
            if steps.is_empty() {
                return Err(Error::validation("Agent job requires at least one step"));
            }
            for step in steps {
                if !matches!(step.action.as_str(), "powershell" | "cmd" | "python") {
                    return Err(Error::validation(format!(
                        "Unknown step action: {}",
                        step.action
                    )));
                }
                if step.script.is_none() && step.command.is_none() {
                    return Err(Error::validation(format!(
                        "Step '{}' requires a script or command",
                        step.name
                    )));
                }
            }
        }
        JobType::Unknown => {
            return Err(Error::validation(format!(
                "Unknown job type: {}",
                definition.job_type.as_deref().unwrap_or("<missing>")
            )))
        }
    }

    if let Some(schedule) = &definition.schedule {
        let report = validate_schedule(schedule, Utc::now());
        if report.status == ValidationStatus::Failed {
            return Err(Error::validation(format!(
                "Invalid schedule: {}",
                report.messages.join("; ")
            )));
        }
    }

    Ok(definition)
}
