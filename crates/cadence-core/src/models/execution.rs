//! Execution history types and the execution state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Created but not yet dispatched
    Pending,

    /// An inline backend is running it
    Running,

    /// Completed successfully
    Success,

    /// Completed with an error
    Failed,

    /// Exceeded its deadline
    Timeout,

    /// Cancelled by an explicit request
    Cancelled,

    /// Waiting for an agent to become available
    Queued,

    /// Handed to a specific agent
    Assigned,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Assigned => "assigned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "failed" => Some(ExecutionStatus::Failed),
            "timeout" => Some(ExecutionStatus::Timeout),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            "queued" => Some(ExecutionStatus::Queued),
            "assigned" => Some(ExecutionStatus::Assigned),
            _ => None,
        }
    }

    /// Terminal statuses cannot be rewritten
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Success
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }

    /// Active statuses block a second scheduled fire of the same job
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Pending
                | ExecutionStatus::Running
                | ExecutionStatus::Queued
                | ExecutionStatus::Assigned
        )
    }

    /// Transitions are strictly monotonic; re-entry into `running` is
    /// disallowed and terminal states accept nothing.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        match (self, next) {
            (_, _) if self.is_terminal() => false,
            (Pending, Running) | (Pending, Queued) => true,
            (Running, Success) | (Running, Failed) | (Running, Timeout) => true,
            // Agent handoff parks a started row back in the queue
            (Running, Queued) => true,
            (Queued, Assigned) | (Queued, Failed) => true,
            (Assigned, Success) | (Assigned, Failed) | (Assigned, Timeout) => true,
            (_, Cancelled) => !self.is_terminal(),
            _ => false,
        }
    }

    /// Statuses the repository treats as overwritable in a terminal write
    pub fn non_terminal_states() -> &'static [&'static str] {
        &["pending", "running", "queued", "assigned"]
    }
}

/// How an execution was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Manual,
    Scheduled,
    Api,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Manual => "manual",
            ExecutionMode::Scheduled => "scheduled",
            ExecutionMode::Api => "api",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(ExecutionMode::Manual),
            "scheduled" => Some(ExecutionMode::Scheduled),
            "api" => Some(ExecutionMode::Api),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt to run a job; immutable once terminal
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub output_log: Option<String>,
    pub error_message: Option<String>,
    pub return_code: Option<i32>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub execution_mode: String,
    pub executed_by: String,
    pub execution_timezone: String,
    pub metadata: serde_json::Value,
}

impl ExecutionRecord {
    pub fn status(&self) -> Option<ExecutionStatus> {
        ExecutionStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().map(|s| s.is_terminal()).unwrap_or(false)
    }
}

/// The outcome an execution is closed with
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub return_code: Option<i32>,
    pub metadata: serde_json::Value,
}

impl ExecutionOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output: Some(output.into()),
            error_message: None,
            return_code: Some(0),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            output: None,
            error_message: Some(error.into()),
            return_code: Some(1),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }
}

/// Filter for history queries
#[derive(Debug, Default, Clone)]
pub struct ExecutionFilter {
    pub job_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Success.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Assigned.is_terminal());
    }

    #[test]
    fn test_inline_path_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Success));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Timeout));
        assert!(!Success.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Success));
    }

    #[test]
    fn test_agent_path_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Queued));
        assert!(Running.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Success));
        assert!(Assigned.can_transition_to(Failed));
        assert!(!Assigned.can_transition_to(Running));
        assert!(!Queued.can_transition_to(Running));
    }

    #[test]
    fn test_cancel_from_any_nonterminal() {
        use ExecutionStatus::*;
        for status in [Pending, Running, Queued, Assigned] {
            assert!(status.can_transition_to(Cancelled), "{status} should cancel");
        }
        for status in [Success, Failed, Timeout, Cancelled] {
            assert!(!status.can_transition_to(Cancelled), "{status} must not cancel");
        }
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            "pending", "running", "success", "failed", "timeout", "cancelled", "queued",
            "assigned",
        ] {
            let parsed = ExecutionStatus::parse(s).unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!(ExecutionStatus::parse("bogus").is_none());
    }

    #[test]
    fn test_mode_round_trip() {
        for m in ["manual", "scheduled", "api"] {
            assert_eq!(ExecutionMode::parse(m).unwrap().as_str(), m);
        }
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = ExecutionRecord {
            execution_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            job_name: "nightly-report".into(),
            status: "success".into(),
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            duration_seconds: Some(1.5),
            output_log: Some("HELLO".into()),
            error_message: None,
            return_code: Some(0),
            retry_count: 0,
            max_retries: 3,
            execution_mode: "manual".into(),
            executed_by: "operator".into(),
            execution_timezone: "America/Chicago".into(),
            metadata: serde_json::json!({"rows": 1}),
        };

        let json = serde_json::to_string(&record).unwrap();
        let back: ExecutionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.execution_id, record.execution_id);
        assert_eq!(back.job_name, record.job_name);
        assert_eq!(back.status, record.status);
        assert_eq!(back.return_code, record.return_code);
        assert_eq!(back.execution_timezone, record.execution_timezone);
        assert_eq!(back.metadata, record.metadata);
    }
}
