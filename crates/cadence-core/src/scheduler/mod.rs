//! Scheduler loop: turns the set of enabled schedulable jobs into timely
//! fires of the executor.
//!
//! The loop is the only mutator of the fire queue; API mutations arrive as
//! events on a channel and pre-empt the sleep. Fires run on a bounded worker
//! pool; a full pool or a wake past the misfire grace drops the fire with a
//! logged warning instead of burst-firing.

pub mod queue;

pub use queue::{FireEntry, FireQueue};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::executor::{ExecutionSummary, JobExecutor};
use crate::models::ExecutionMode;
use crate::repository::JobRepository;
use crate::schedule::ScheduleSpec;

/// Mutations the loop reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// Created, updated, toggled: re-evaluate the entry
    JobChanged(Uuid),

    /// Deleted: drop the entry
    JobRemoved(Uuid),
}

/// Cheap handle the API layer uses to poke the loop
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerEvent>,
}

impl SchedulerHandle {
    pub fn notify_job_changed(&self, job_id: Uuid) {
        // A closed channel just means the loop is gone; nothing to do
        let _ = self.tx.send(SchedulerEvent::JobChanged(job_id));
    }

    pub fn notify_job_removed(&self, job_id: Uuid) {
        let _ = self.tx.send(SchedulerEvent::JobRemoved(job_id));
    }
}

/// Late fires beyond the grace are dropped, not burst-fired
pub fn is_misfire(fire_at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    let grace = ChronoDuration::from_std(grace).unwrap_or_else(|_| ChronoDuration::zero());
    now - fire_at > grace
}

pub struct SchedulerLoop {
    jobs: JobRepository,
    executor: JobExecutor,
    config: SchedulerConfig,
    queue: FireQueue,
    specs: HashMap<Uuid, ScheduleSpec>,
    rx: mpsc::UnboundedReceiver<SchedulerEvent>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    shutdown_grace: Duration,
}

impl SchedulerLoop {
    pub fn new(
        jobs: JobRepository,
        executor: JobExecutor,
        config: SchedulerConfig,
        shutdown: CancellationToken,
        shutdown_grace: Duration,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = Arc::new(Semaphore::new(config.worker_pool_size));
        (
            Self {
                jobs,
                executor,
                config,
                queue: FireQueue::new(),
                specs: HashMap::new(),
                rx,
                workers,
                shutdown,
                shutdown_grace,
            },
            SchedulerHandle { tx },
        )
    }

    pub async fn run(mut self) {
        if let Err(e) = self.load_all().await {
            error!("initial schedule scan failed: {}", e);
        }
        info!(jobs = self.queue.len(), "scheduler loop started");

        loop {
            let sleep_for = self.next_sleep(Utc::now());

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    self.fire_due(Utc::now()).await;
                }
                event = self.rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.drain().await;
        info!("scheduler loop stopped");
    }

    /// Sleep until the earliest fire, bounded so mutations and shutdown are
    /// observed promptly
    fn next_sleep(&self, now: DateTime<Utc>) -> Duration {
        let max_tick = self.config.max_tick();
        match self.queue.peek() {
            Some(entry) if entry.fire_at <= now => Duration::ZERO,
            Some(entry) => (entry.fire_at - now)
                .to_std()
                .map(|until| until.min(max_tick))
                .unwrap_or(Duration::ZERO),
            None => max_tick,
        }
    }

    async fn load_all(&mut self) -> crate::Result<()> {
        let records = self.jobs.list_schedulable().await?;
        let now = Utc::now();
        for record in records {
            let job_id = record.job_id;
            let Some(schedule) = record.definition().schedule else {
                continue;
            };
            match ScheduleSpec::from_config(&schedule) {
                Ok(spec) => self.install(job_id, &record.name, spec, now),
                Err(e) => warn!(job = %record.name, "schedule rejected at scan: {}", e),
            }
        }
        Ok(())
    }

    fn install(&mut self, job_id: Uuid, name: &str, spec: ScheduleSpec, now: DateTime<Utc>) {
        match spec.next_fire_time(now) {
            Some(fire_at) => {
                let rendering = spec.describe_fire(fire_at);
                debug!(
                    job = %name,
                    fire_utc = %rendering.utc,
                    fire_local = %rendering.local,
                    "next fire computed"
                );
                self.queue.schedule(job_id, fire_at);
                self.specs.insert(job_id, spec);
            }
            None => {
                info!(job = %name, "schedule exhausted; leaving the active set");
                self.queue.remove(job_id);
                self.specs.remove(&job_id);
            }
        }
    }

    async fn fire_due(&mut self, now: DateTime<Utc>) {
        for entry in self.queue.pop_due(now) {
            let job_id = entry.job_id;

            if is_misfire(entry.fire_at, now, self.config.misfire_grace()) {
                warn!(
                    %job_id,
                    scheduled_for = %entry.fire_at,
                    late_secs = (now - entry.fire_at).num_seconds(),
                    "misfire: fire skipped beyond grace"
                );
                self.reschedule(job_id, now);
                continue;
            }

            match self.workers.clone().try_acquire_owned() {
                Ok(permit) => {
                    let executor = self.executor.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        match executor
                            .execute_job(job_id, ExecutionMode::Scheduled, "system", false)
                            .await
                        {
                            Ok(ExecutionSummary::Skipped { reason }) => {
                                debug!(%job_id, "scheduled fire skipped: {}", reason);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                // Reified in history where possible; never fatal here
                                error!(%job_id, "scheduled execution error: {}", e);
                            }
                        }
                    });
                }
                Err(_) => {
                    warn!(%job_id, "worker pool exhausted; fire dropped (misfire)");
                }
            }

            // Next fire derives from the actual wake time, not the planned
            // instant, so drift never causes burst catch-up
            self.reschedule(job_id, now);
        }
    }

    fn reschedule(&mut self, job_id: Uuid, now: DateTime<Utc>) {
        let Some(spec) = self.specs.get(&job_id).cloned() else {
            return;
        };
        if spec.is_once() {
            info!(%job_id, "one-time schedule fired; retiring entry");
            self.specs.remove(&job_id);
            self.queue.remove(job_id);
            return;
        }
        match spec.next_fire_time(now) {
            Some(fire_at) => self.queue.schedule(job_id, fire_at),
            None => {
                info!(%job_id, "schedule exhausted; retiring entry");
                self.specs.remove(&job_id);
                self.queue.remove(job_id);
            }
        }
    }

    async fn handle_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::JobRemoved(job_id) => {
                self.queue.remove(job_id);
                self.specs.remove(&job_id);
                debug!(%job_id, "entry removed");
            }
            SchedulerEvent::JobChanged(job_id) => {
                let record = match self.jobs.get_record(job_id).await {
                    Ok(record) => record,
                    Err(e) => {
                        // Keep the previous entry; it re-enters on the next
                        // successful evaluation
                        warn!(%job_id, "re-evaluation failed: {}", e);
                        return;
                    }
                };

                let Some(record) = record else {
                    self.queue.remove(job_id);
                    self.specs.remove(&job_id);
                    return;
                };

                let schedule = record.definition().schedule;
                let (true, Some(schedule)) = (record.enabled, schedule) else {
                    self.queue.remove(job_id);
                    self.specs.remove(&job_id);
                    return;
                };

                match ScheduleSpec::from_config(&schedule) {
                    Ok(spec) => self.install(job_id, &record.name, spec, Utc::now()),
                    Err(e) => {
                        warn!(job = %record.name, "schedule rejected: {}", e);
                        self.queue.remove(job_id);
                        self.specs.remove(&job_id);
                    }
                }
            }
        }
    }

    /// Stop accepting fires and wait a bounded grace for in-flight workers
    async fn drain(&self) {
        let total = self.config.worker_pool_size as u32;
        match tokio::time::timeout(self.shutdown_grace, self.workers.acquire_many(total)).await {
            Ok(_) => info!("all workers drained"),
            Err(_) => warn!(
                grace_secs = self.shutdown_grace.as_secs(),
                "shutdown grace elapsed with workers still running"
            ),
        }
    }
}
