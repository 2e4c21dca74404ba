pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod models;
pub mod repository;
pub mod retention;
pub mod schedule;
pub mod scheduler;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use dispatch::{
    AgentClient, AgentDispatcher, AssignmentPayload, CompletionReport, HeartbeatRequest,
    RegisterRequest, RegisterResponse, StatusUpdateRequest,
};
pub use error::{Error, Result};
pub use executor::{
    AgentBackend, BackendOutcome, ExecutionBackend, ExecutionContext, ExecutionSummary,
    JobExecutor, PowerShellBackend, SqlBackend,
};
pub use models::{
    AgentRecord, AgentStatus, Assignment, ExecutionFilter, ExecutionMode, ExecutionOutcome,
    ExecutionRecord, ExecutionStatus, JobDefinition, JobFilter, JobFlatView, JobRecord, JobType,
};
pub use repository::{
    AgentRepository, ConnectionRepository, CreateConnectionRequest, CreateJobRequest,
    ExecutionRepository, JobDetails, JobRepository, StartExecution, UpdateJobRequest,
};
pub use schedule::{
    validate_schedule, CronExpr, ScheduleConfig, ScheduleSpec, ValidationReport, ValidationStatus,
};
pub use scheduler::{SchedulerHandle, SchedulerLoop};

/// Current version of cadence
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
