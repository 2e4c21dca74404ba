//! Composition root: wires the store, executor, scheduler loop, dispatcher
//! and retention pruner together and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cadence_core::repository::{
    AgentRepository, ConnectionRepository, ExecutionRepository, JobRepository,
};
use cadence_core::{
    retention, AgentBackend, AgentClient, AgentDispatcher, Config, Database, Error, JobExecutor,
    PowerShellBackend, Result, SchedulerLoop, SqlBackend,
};

use crate::routes::create_router;
use crate::state::AppState;

/// Build the application state and spawn the background tasks: scheduler
/// loop, dispatch sweeper and retention pruner.
pub fn build_state(
    config: &Config,
    db: Database,
    shutdown: CancellationToken,
) -> Result<(AppState, Vec<JoinHandle<()>>)> {
    let jobs = JobRepository::new(db.clone());
    let executions = ExecutionRepository::new(db.clone());
    let agents = AgentRepository::new(db.clone());
    let connections = ConnectionRepository::new(db.clone());

    let dispatch_wakeup = Arc::new(Notify::new());
    let client = AgentClient::new(Duration::from_secs(config.agents.request_timeout_secs))?;
    let dispatcher = AgentDispatcher::new(
        agents,
        executions.clone(),
        jobs.clone(),
        client,
        config.agents.clone(),
        dispatch_wakeup.clone(),
    );

    let powershell = PowerShellBackend::new(
        config.execution.powershell_path.clone(),
        config.execution.max_output_bytes,
    );
    let sql = SqlBackend::new(
        connections.clone(),
        config.database.clone(),
        config.execution.max_rows,
    );
    let agent_backend = AgentBackend::new(executions.clone(), dispatch_wakeup);

    let executor = JobExecutor::new(
        jobs.clone(),
        executions.clone(),
        powershell,
        sql,
        agent_backend,
        &config.execution,
        &config.scheduler,
    );

    let mut handles = Vec::new();

    let (scheduler_loop, scheduler) = SchedulerLoop::new(
        jobs.clone(),
        executor.clone(),
        config.scheduler.clone(),
        shutdown.clone(),
        Duration::from_secs(config.server.graceful_shutdown_timeout_secs),
    );
    if config.scheduler.enabled {
        handles.push(tokio::spawn(scheduler_loop.run()));
    } else {
        info!("scheduler loop disabled by configuration");
    }

    handles.push(tokio::spawn(cadence_core::dispatch::run_sweeper(
        dispatcher.clone(),
        shutdown.clone(),
    )));

    handles.push(tokio::spawn(retention::run_pruner(
        executions.clone(),
        config.retention.clone(),
        shutdown,
    )));

    let state = AppState::new(
        db,
        jobs,
        executions,
        connections,
        executor,
        dispatcher,
        scheduler,
    );

    Ok((state, handles))
}

/// Connect, optionally migrate, start background tasks and serve until
/// interrupted
pub async fn run(config: Config, migrate: bool) -> Result<()> {
    if config.server.secret_key.is_none() {
        return Err(Error::config(
            "SECRET_KEY is required (environment variable or [server] secret_key)",
        ));
    }

    let db = Database::connect(&config.database).await?;
    if migrate {
        db.migrate().await?;
    }

    let shutdown = CancellationToken::new();
    let (state, handles) = build_state(&config, db, shutdown.clone())?;
    let app = create_router(state);

    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    info!("Cadence API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::network(e.to_string()))?;

    let serve_shutdown = shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        serve_shutdown.cancelled().await;
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    server.await.map_err(|e| Error::network(e.to_string()))?;

    // Give background tasks a bounded window to drain
    let grace = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    for handle in handles {
        if tokio::time::timeout(grace, handle).await.is_err() {
            error!("background task did not stop within the shutdown grace");
        }
    }

    Ok(())
}
