use std::path::Path;

use cadence_core::models::JobDefinition;
use cadence_core::schedule::{validate_schedule, ValidationStatus};
use cadence_core::validation::{powershell_warnings, validate_job_payload};
use cadence_core::{Config, Database};

use crate::JobCommands;

/// Start the full server: migrations, background tasks, HTTP API
pub async fn serve(config: Config, skip_migrate: bool) -> anyhow::Result<()> {
    cadence_api::run(config, !skip_migrate).await?;
    Ok(())
}

pub async fn migrate(config: &Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    println!("Migrations applied");
    Ok(())
}

/// Offline validation of a job YAML file: payload rules plus a graded
/// schedule report
pub fn validate(file: &Path) -> anyhow::Result<()> {
    let yaml = std::fs::read_to_string(file)?;

    let definition = JobDefinition::parse(&yaml)?;
    let name = definition
        .name
        .clone()
        .or_else(|| {
            file.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "unnamed".to_string());

    match validate_job_payload(&name, &yaml) {
        Ok(definition) => {
            println!("PASSED: job '{}' ({})", name, definition.job_type());

            if let Some(script) = &definition.inline_script {
                for warning in powershell_warnings(script) {
                    println!("WARNING: {}", warning);
                }
            }

            if let Some(schedule) = &definition.schedule {
                let report = validate_schedule(schedule, chrono::Utc::now());
                match report.status {
                    ValidationStatus::Passed => println!("Schedule: PASSED"),
                    ValidationStatus::Warning => println!("Schedule: WARNING"),
                    ValidationStatus::Failed => println!("Schedule: FAILED"),
                }
                for message in &report.messages {
                    println!("  - {}", message);
                }
            } else {
                println!("Schedule: none (on-demand job)");
            }
            Ok(())
        }
        Err(e) => {
            println!("FAILED: {}", e);
            std::process::exit(1);
        }
    }
}

/// Job management subcommands speak to a running server over HTTP
pub async fn job(command: JobCommands) -> anyhow::Result<()> {
    let client = reqwest::Client::new();

    let (url, body): (String, Option<serde_json::Value>) = match &command {
        JobCommands::List {
            enabled_only,
            job_type,
            limit,
            server,
        } => {
            let mut url = format!("{}/api/jobs?enabled_only={}", server, enabled_only);
            if let Some(job_type) = job_type {
                url.push_str(&format!("&type={}", job_type));
            }
            if let Some(limit) = limit {
                url.push_str(&format!("&limit={}", limit));
            }
            (url, None)
        }
        JobCommands::Show { id, server } => (format!("{}/api/jobs/{}", server, id), None),
        JobCommands::Run {
            id,
            allow_overlap,
            server,
        } => (
            format!("{}/api/jobs/{}/run", server, id),
            Some(serde_json::json!({
                "allow_overlap": allow_overlap,
                "executed_by": "cli",
            })),
        ),
        JobCommands::History { id, limit, server } => {
            let mut url = format!("{}/api/jobs/{}/logs", server, id);
            if let Some(limit) = limit {
                url.push_str(&format!("?limit={}", limit));
            }
            (url, None)
        }
    };

    let response = match body {
        Some(body) => client.post(&url).json(&body).send().await?,
        None => client.get(&url).send().await?,
    };

    let status = response.status();
    let payload: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
    println!("{}", serde_json::to_string_pretty(&payload)?);

    if !status.is_success() {
        anyhow::bail!("server answered {}", status);
    }
    Ok(())
}
