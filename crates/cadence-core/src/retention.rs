//! History retention: optional background pruning of terminal execution rows
//! by age and per-job count. Non-terminal rows are never touched.

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::RetentionConfig;
use crate::repository::ExecutionRepository;

pub async fn run_pruner(
    executions: ExecutionRepository,
    config: RetentionConfig,
    shutdown: CancellationToken,
) {
    if !config.enabled || (config.max_age_days == 0 && config.max_rows_per_job == 0) {
        info!("history retention disabled");
        return;
    }

    let interval = std::time::Duration::from_secs(config.interval_secs.max(60));
    info!(
        max_age_days = config.max_age_days,
        max_rows_per_job = config.max_rows_per_job,
        interval_secs = interval.as_secs(),
        "history retention started"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.cancelled() => break,
        }

        match executions
            .prune(config.max_age_days, config.max_rows_per_job)
            .await
        {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned terminal execution history"),
            Err(e) => error!("retention pruning failed: {}", e),
        }
    }

    info!("history retention stopped");
}
