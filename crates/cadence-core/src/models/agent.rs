//! Agent registry records and assignments

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Agent availability status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Busy => "busy",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(AgentStatus::Online),
            "offline" => Some(AgentStatus::Offline),
            "busy" => Some(AgentStatus::Busy),
            _ => None,
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A long-lived passive worker, as stored in `agent_registry`
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgentRecord {
    pub agent_id: String,
    pub pool_id: String,
    pub endpoint_url: String,
    pub capabilities: serde_json::Value,
    pub max_parallel_jobs: i32,
    pub os_info: Option<String>,
    pub cpu_count: Option<i32>,
    pub memory_mb: Option<i64>,
    pub disk_free_mb: Option<i64>,
    #[serde(skip_serializing)]
    pub auth_token: String,
    pub status: String,
    pub active_jobs: i32,
    pub jobs_completed: i64,
    pub jobs_failed: i64,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl AgentRecord {
    pub fn status(&self) -> Option<AgentStatus> {
        AgentStatus::parse(&self.status)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_jobs < self.max_parallel_jobs
    }

    /// An agent is only trusted as online while its heartbeat is fresh
    pub fn heartbeat_fresh(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let window = ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero());
        now - self.last_heartbeat_at <= window
    }

    /// Eligible to receive a new assignment from the given pool
    pub fn accepts_from_pool(&self, pool: Option<&str>, window: Duration, now: DateTime<Utc>) -> bool {
        self.status() == Some(AgentStatus::Online)
            && self.heartbeat_fresh(window, now)
            && self.has_capacity()
            && pool.map(|p| p == self.pool_id).unwrap_or(true)
    }
}

/// Live linkage of an execution record to an agent
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Assignment {
    pub execution_id: Uuid,
    pub agent_id: String,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
}

impl Assignment {
    pub fn is_live(&self) -> bool {
        self.completed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(active: i32, max: i32, heartbeat_age_secs: i64) -> AgentRecord {
        AgentRecord {
            agent_id: "a1".into(),
            pool_id: "default".into(),
            endpoint_url: "http://agent:8080".into(),
            capabilities: serde_json::json!(["powershell"]),
            max_parallel_jobs: max,
            os_info: None,
            cpu_count: None,
            memory_mb: None,
            disk_free_mb: None,
            auth_token: "tok".into(),
            status: "online".into(),
            active_jobs: active,
            jobs_completed: 0,
            jobs_failed: 0,
            registered_at: Utc::now(),
            last_heartbeat_at: Utc::now() - ChronoDuration::seconds(heartbeat_age_secs),
            last_assigned_at: None,
        }
    }

    #[test]
    fn test_capacity() {
        assert!(agent(0, 1, 0).has_capacity());
        assert!(!agent(1, 1, 0).has_capacity());
        assert!(agent(2, 4, 0).has_capacity());
    }

    #[test]
    fn test_stale_heartbeat_blocks_assignment() {
        let now = Utc::now();
        let window = Duration::from_secs(60);
        assert!(agent(0, 1, 10).accepts_from_pool(Some("default"), window, now));
        assert!(!agent(0, 1, 120).accepts_from_pool(Some("default"), window, now));
    }

    #[test]
    fn test_pool_matching() {
        let now = Utc::now();
        let window = Duration::from_secs(60);
        let a = agent(0, 1, 0);
        assert!(a.accepts_from_pool(Some("default"), window, now));
        assert!(!a.accepts_from_pool(Some("gpu"), window, now));
        // No requested pool means any pool is acceptable
        assert!(a.accepts_from_pool(None, window, now));
    }

    #[test]
    fn test_offline_agent_rejected() {
        let now = Utc::now();
        let mut a = agent(0, 1, 0);
        a.status = "offline".into();
        assert!(!a.accepts_from_pool(None, Duration::from_secs(60), now));
    }
}
