pub mod agent;
pub mod connection;
pub mod execution;
pub mod job;

pub use agent::{AgentRecord, AgentStatus, Assignment};
pub use connection::NamedConnection;
pub use execution::{
    ExecutionFilter, ExecutionMode, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
};
pub use job::{
    AgentStep, JobDefinition, JobFilter, JobFlatView, JobRecord, JobType, PsParameter,
    JOB_CONFIG_VERSION,
};
