//! PowerShell backend: spawn the host interpreter, await with a deadline,
//! kill on expiry, collect bounded output.

use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{truncate_output, BackendOutcome, ExecutionBackend, ExecutionContext};
use crate::{Error, Result};

/// Return code reported when the child is killed at the deadline
pub const TIMEOUT_RETURN_CODE: i32 = -1;

const DEFAULT_EXECUTION_POLICY: &str = "RemoteSigned";

#[derive(Debug, Clone)]
pub struct PowerShellBackend {
    interpreter: String,
    max_output_bytes: usize,
}

impl PowerShellBackend {
    pub fn new(interpreter: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            interpreter: interpreter.into(),
            max_output_bytes,
        }
    }

    async fn run_script(
        &self,
        script_path: &str,
        ctx: &ExecutionContext,
        script_type: &str,
    ) -> Result<BackendOutcome> {
        let definition = &ctx.definition;
        let policy = definition
            .execution_policy
            .as_deref()
            .unwrap_or(DEFAULT_EXECUTION_POLICY);

        let mut command = Command::new(&self.interpreter);
        command
            .arg("-ExecutionPolicy")
            .arg(policy)
            .arg("-File")
            .arg(script_path);

        for parameter in definition.normalized_parameters()? {
            command.arg(format!("-{}", parameter.name)).arg(parameter.value);
        }

        if let Some(dir) = &definition.working_directory {
            command.current_dir(dir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            Error::backend(format!(
                "Failed to start interpreter '{}': {}",
                self.interpreter, e
            ))
        })?;

        match tokio::time::timeout(ctx.deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr);
                }
                let combined = truncate_output(combined, self.max_output_bytes);

                let return_code = output.status.code().unwrap_or(TIMEOUT_RETURN_CODE);
                let success = return_code == 0;
                let error = if success {
                    None
                } else {
                    let trimmed = stderr.trim();
                    Some(if trimmed.is_empty() {
                        format!("PowerShell exited with code {}", return_code)
                    } else {
                        trimmed.to_string()
                    })
                };

                let mut outcome = BackendOutcome {
                    success,
                    output: combined,
                    error,
                    return_code,
                    terminal_now: true,
                    timed_out: false,
                    metadata: serde_json::Map::new(),
                };
                outcome
                    .metadata
                    .insert("script_type".into(), script_type.into());
                Ok(outcome)
            }
            Ok(Err(e)) => Err(Error::backend(format!(
                "Failed to collect interpreter output: {}",
                e
            ))),
            Err(_) => {
                // kill_on_drop reaps the abandoned child
                let secs = ctx.deadline.as_secs();
                Ok(BackendOutcome {
                    success: false,
                    output: String::new(),
                    error: Some(format!("PowerShell script timed out after {} seconds", secs)),
                    return_code: TIMEOUT_RETURN_CODE,
                    terminal_now: true,
                    timed_out: true,
                    metadata: serde_json::Map::new(),
                })
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for PowerShellBackend {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<BackendOutcome> {
        if let Some(path) = &ctx.definition.script_path {
            if !std::path::Path::new(path).exists() {
                return Err(Error::backend(format!(
                    "PowerShell script file not found: {}",
                    path
                )));
            }
            return self.run_script(path, ctx, "file").await;
        }

        let Some(script) = &ctx.definition.inline_script else {
            return Err(Error::validation(
                "PowerShell job requires inlineScript or scriptPath",
            ));
        };

        // Unique temp file, removed on every path when the handle drops
        let mut temp = tempfile::Builder::new()
            .prefix("cadence_job_")
            .suffix(".ps1")
            .tempfile()
            .map_err(|e| Error::backend(format!("Failed to create temp script: {}", e)))?;
        temp.write_all(script.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| Error::backend(format!("Failed to write temp script: {}", e)))?;

        let path = temp.path().to_string_lossy().into_owned();
        self.run_script(&path, ctx, "inline").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobDefinition, JobRecord};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn context(definition: JobDefinition, deadline_secs: u64) -> ExecutionContext {
        ExecutionContext {
            record: JobRecord {
                job_id: Uuid::new_v4(),
                name: "ps-test".into(),
                description: None,
                version: "2.0".into(),
                yaml_configuration: String::new(),
                enabled: true,
                created_date: Utc::now(),
                modified_date: Utc::now(),
                created_by: "tests".into(),
            },
            definition,
            execution_id: Uuid::new_v4(),
            deadline: Duration::from_secs(deadline_secs),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_inline_script_invocation_shape() {
        // `echo` stands in for the interpreter: it exits 0 and prints the
        // argument vector, which lets us assert the invocation shape.
        let backend = PowerShellBackend::new("echo", 64 * 1024);
        let definition = JobDefinition {
            job_type: Some("powershell".into()),
            inline_script: Some("Write-Host HELLO".into()),
            parameters: Some(serde_yaml::from_str("- Name=world").unwrap()),
            ..Default::default()
        };

        let outcome = backend.execute(&context(definition, 10)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.return_code, 0);
        assert!(outcome.terminal_now);
        assert!(outcome.output.contains("-ExecutionPolicy RemoteSigned"));
        assert!(outcome.output.contains("-File"));
        assert!(outcome.output.contains("-Name world"));
        assert_eq!(
            outcome.metadata.get("script_type"),
            Some(&serde_json::Value::String("inline".into()))
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_interpreter_is_backend_error() {
        let backend = PowerShellBackend::new("/nonexistent/pwsh", 1024);
        let definition = JobDefinition {
            inline_script: Some("Write-Host hi".into()),
            ..Default::default()
        };

        let err = backend.execute(&context(definition, 5)).await.unwrap_err();
        assert_eq!(err.category(), "backend_error");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_deadline_kills_child() {
        use std::os::unix::fs::PermissionsExt;

        // A fake interpreter that ignores its arguments and sleeps
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("slow-interp");
        std::fs::write(&fake, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = PowerShellBackend::new(fake.to_string_lossy(), 1024);
        let definition = JobDefinition {
            inline_script: Some("Start-Sleep 30".into()),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let outcome = backend.execute(&context(definition, 1)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert_eq!(outcome.return_code, TIMEOUT_RETURN_CODE);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_script_file_rejected() {
        let backend = PowerShellBackend::new("echo", 1024);
        let definition = JobDefinition {
            script_path: Some("/no/such/script.ps1".into()),
            ..Default::default()
        };

        let err = backend.execute(&context(definition, 5)).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
