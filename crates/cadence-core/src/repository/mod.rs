pub mod agent_repository;
pub mod connection_repository;
pub mod execution_repository;
pub mod job_repository;

pub use agent_repository::{AgentRegistration, AgentRepository, HeartbeatUpdate};
pub use connection_repository::{ConnectionRepository, CreateConnectionRequest};
pub use execution_repository::{ExecutionRepository, StartExecution};
pub use job_repository::{
    CreateJobRequest, FlatJobFields, JobDetails, JobRepository, UpdateJobRequest,
};
