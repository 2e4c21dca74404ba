use cadence_core::repository::{ConnectionRepository, ExecutionRepository, JobRepository};
use cadence_core::{AgentDispatcher, Database, JobExecutor, SchedulerHandle};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub jobs: JobRepository,
    pub executions: ExecutionRepository,
    pub connections: ConnectionRepository,
    pub executor: JobExecutor,
    pub dispatcher: AgentDispatcher,
    pub scheduler: SchedulerHandle,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        jobs: JobRepository,
        executions: ExecutionRepository,
        connections: ConnectionRepository,
        executor: JobExecutor,
        dispatcher: AgentDispatcher,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            db,
            jobs,
            executions,
            connections,
            executor,
            dispatcher,
            scheduler,
        }
    }
}
