//! Job worker service: the scheduler half of the dispatcher.
//!
//! The `JobWorker` is a long-running service that:
//! - Recovers jobs whose claim expired (crashed or stalled workers)
//! - Polls the `JobStore` for due jobs in priority order
//! - Claims a job only when both a global and a per-type slot are free
//! - Spawns the `JobRunner` for each claimed job, holding both slots
//!
//! # Architecture
//!
//! ```text
//! JobWorker::run
//!     │
//!     ├─► recover_expired (emit Recovered)
//!     ├─► find_due (skip types at their limit)
//!     ├─► try_acquire global + per-type permit
//!     ├─► claim (conditional update, conflicts skipped)
//!     └─► JoinSet::spawn(JobRunner::run) ── permits released on exit, wake loop
//! ```
//!
//! # Example
//!
//! ```ignore
//! let worker = JobWorker::new(store, Arc::new(registry), deps, JobWorkerConfig::default());
//! let queue = worker.queue();
//!
//! queue.enqueue_job(&SendOtpMail { to, otp }).await?;
//! worker.run_until_shutdown().await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{DispatchError, JobResult};
use super::events::{JobEvent, JobEvents};
use super::job_store::JobStore;
use super::queue::JobQueue;
use super::registry::SharedJobRegistry;
use super::runner::{JobRunner, UNKNOWN_TYPE_LOCK_LIFETIME};
use crate::kernel::ServerDeps;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// Worker ID for this instance, written to `locked_by`
    pub worker_id: String,
    /// Maximum number of due jobs fetched per poll
    pub batch_size: i64,
    /// How long to wait when there is nothing to do
    pub poll_interval: Duration,
    /// Jobs running at once across all types
    pub max_concurrency: usize,
    /// Pause after the store fails a poll
    pub error_backoff: Duration,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            batch_size: 20,
            poll_interval: Duration::from_secs(5),
            max_concurrency: 20,
            error_backoff: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct JobWorker {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
    runner: Arc<JobRunner>,
    config: JobWorkerConfig,
    global_slots: Arc<Semaphore>,
    type_slots: HashMap<String, Arc<Semaphore>>,
    events: JobEvents,
    wake: Arc<Notify>,
}

impl JobWorker {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
        config: JobWorkerConfig,
    ) -> Self {
        let events = JobEvents::new();
        let runner = Arc::new(JobRunner::new(
            store.clone(),
            registry.clone(),
            deps,
            config.worker_id.clone(),
            events.clone(),
        )
        .with_write_backoff(config.error_backoff));

        let type_slots = registry
            .definitions()
            .map(|d| {
                (
                    d.name.clone(),
                    Arc::new(Semaphore::new(d.concurrency_limit.max(1))),
                )
            })
            .collect();

        Self {
            store,
            registry,
            runner,
            global_slots: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            type_slots,
            config,
            events,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Enqueue handle wired to this worker's event channel and wake-up.
    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.store.clone(), self.registry.clone())
            .with_dispatcher(self.events.clone(), self.wake.clone())
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Jobs currently executing in this worker.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency.max(1) - self.global_slots.available_permits()
    }

    /// Shorten the current wait and poll again.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Run one poll cycle, spawning claimed jobs into `tasks`.
    ///
    /// Returns how many jobs were claimed.
    pub async fn dispatch_due(&self, tasks: &mut JoinSet<()>) -> JobResult<usize> {
        for job in self.store.recover_expired(Utc::now()).await? {
            warn!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                state = ?job.state,
                "recovered job with expired lock"
            );
            self.events.emit(JobEvent::recovered(&job));
        }

        if self.global_slots.available_permits() == 0 {
            return Ok(0);
        }

        // A saturated type must not use up the batch and starve the others
        let skip_types: Vec<String> = self
            .type_slots
            .iter()
            .filter(|(_, slots)| slots.available_permits() == 0)
            .map(|(job_type, _)| job_type.clone())
            .collect();

        let candidates = self
            .store
            .find_due(Utc::now(), self.config.batch_size, &skip_types)
            .await?;

        let mut dispatched = 0;
        let mut hit_type_limit = false;
        for job in candidates {
            let Ok(global_permit) = self.global_slots.clone().try_acquire_owned() else {
                break;
            };

            let (type_permit, lock_lifetime) = match self.type_slots.get(&job.job_type) {
                Some(slots) => match slots.clone().try_acquire_owned() {
                    Ok(permit) => {
                        let lock_lifetime = self
                            .registry
                            .lookup(&job.job_type)
                            .map(|d| d.lock_lifetime)
                            .unwrap_or(UNKNOWN_TYPE_LOCK_LIFETIME);
                        (Some(permit), lock_lifetime)
                    }
                    Err(_) => {
                        debug!(job_id = %job.id, job_type = %job.job_type, "type at concurrency limit");
                        hit_type_limit = true;
                        continue;
                    }
                },
                // Unregistered types only take a global slot; the runner fails them
                None => (None, UNKNOWN_TYPE_LOCK_LIFETIME),
            };

            let now = Utc::now();
            let locked_until = now
                + chrono::Duration::from_std(lock_lifetime)
                    .unwrap_or_else(|_| chrono::Duration::minutes(10));

            let claimed = match self
                .store
                .claim(job.id, &self.config.worker_id, now, locked_until)
                .await
            {
                Ok(claimed) => claimed,
                Err(DispatchError::ClaimConflict(_)) => {
                    debug!(job_id = %job.id, "job claimed by another worker");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let runner = self.runner.clone();
            let wake = self.wake.clone();
            tasks.spawn(async move {
                let job_id = claimed.id;
                if let Err(e) = runner.run(claimed).await {
                    error!(job_id = %job_id, error = %e, "failed to record job outcome");
                }
                drop(type_permit);
                drop(global_permit);
                wake.notify_one();
            });
            dispatched += 1;
        }

        // The batch may have been filled by a type that just hit its limit,
        // hiding due jobs of other types; poll again with it skipped
        if hit_type_limit {
            self.wake.notify_one();
        }

        Ok(dispatched)
    }

    /// Run the worker until `shutdown` is cancelled, then wait for in-flight
    /// jobs for up to `shutdown_grace`.
    pub async fn run(&self, shutdown: CancellationToken) -> JobResult<()> {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = self.config.batch_size,
            max_concurrency = self.config.max_concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            job_types = ?self.registry.registered_types(),
            "job worker starting"
        );

        let mut tasks = JoinSet::new();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.dispatch_due(&mut tasks).await {
                Ok(count) => {
                    if count > 0 {
                        debug!(count, "dispatched jobs");
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to poll for due jobs");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff) => {}
                    }
                    continue;
                }
            }

            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!(error = %e, "job task aborted");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        self.drain(tasks).await;

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    /// Run until Ctrl+C.
    pub async fn run_until_shutdown(&self) -> JobResult<()> {
        let shutdown = CancellationToken::new();

        let signal = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            signal.cancel();
        });

        self.run(shutdown).await
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        info!(count = tasks.len(), "waiting for running jobs to complete");

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            // Abandoned claims expire and are recovered by the next poller
            warn!(
                count = tasks.len(),
                "shutdown grace elapsed, abandoning running jobs"
            );
            tasks.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::kernel::jobs::{
        InMemoryJobStore, Job, JobDefinition, JobPriority, JobRegistry, JobState,
    };
    use crate::kernel::TestDependencies;

    fn gated_registry(gate: Arc<Semaphore>, types: &[(&str, usize, JobPriority)]) -> JobRegistry {
        let mut registry = JobRegistry::new();
        for (name, limit, priority) in types {
            let gate = gate.clone();
            registry
                .register::<Value, _, _>(
                    JobDefinition::builder()
                        .name(*name)
                        .priority(*priority)
                        .concurrency_limit(*limit)
                        .build(),
                    move |_payload, _deps| {
                        let gate = gate.clone();
                        async move {
                            let _permit = gate.acquire().await?;
                            Ok::<(), anyhow::Error>(())
                        }
                    },
                )
                .unwrap();
        }
        registry
    }

    fn worker(
        registry: JobRegistry,
        max_concurrency: usize,
    ) -> (JobWorker, Arc<InMemoryJobStore>) {
        let store = Arc::new(InMemoryJobStore::new());
        let config = JobWorkerConfig {
            max_concurrency,
            poll_interval: Duration::from_millis(20),
            ..JobWorkerConfig::with_worker_id("worker-test")
        };
        let worker = JobWorker::new(
            store.clone(),
            Arc::new(registry),
            TestDependencies::new().into_server_deps(),
            config,
        );
        (worker, store)
    }

    async fn finish(gate: &Semaphore, tasks: &mut JoinSet<()>) {
        gate.add_permits(1000);
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = JobWorkerConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_concurrency, 20);
        assert!(config.worker_id.starts_with("worker-"));
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = JobWorkerConfig::with_worker_id("my-worker");
        assert_eq!(config.worker_id, "my-worker");
    }

    #[tokio::test]
    async fn per_type_limit_caps_dispatch_without_starving_other_types() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = gated_registry(
            gate.clone(),
            &[
                ("image", 2usize, JobPriority::High),
                ("mail", 2usize, JobPriority::Low),
            ],
        );
        let (worker, store) = worker(registry, 10);
        let queue = worker.queue();

        for _ in 0..5 {
            queue.enqueue("image", json!({})).await.unwrap();
        }

        let mut tasks = JoinSet::new();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 2);
        assert_eq!(store.count_by_state("image", JobState::Running).await.unwrap(), 2);

        queue.enqueue("mail", json!({})).await.unwrap();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 1);
        assert_eq!(store.count_by_state("mail", JobState::Running).await.unwrap(), 1);
        assert_eq!(store.count_by_state("image", JobState::Running).await.unwrap(), 2);
        assert_eq!(worker.in_flight(), 3);

        finish(&gate, &mut tasks).await;
        assert_eq!(worker.in_flight(), 0);
        assert_eq!(store.count_by_state("image", JobState::Completed).await.unwrap(), 2);
        assert_eq!(store.count_by_state("image", JobState::Pending).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn global_limit_caps_dispatch() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = gated_registry(gate.clone(), &[("image", 10usize, JobPriority::Normal)]);
        let (worker, store) = worker(registry, 3);
        let queue = worker.queue();

        for _ in 0..5 {
            queue.enqueue("image", json!({})).await.unwrap();
        }

        let mut tasks = JoinSet::new();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 3);
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 0);
        assert_eq!(store.count_by_state("image", JobState::Pending).await.unwrap(), 2);

        finish(&gate, &mut tasks).await;
    }

    #[tokio::test]
    async fn higher_priority_is_claimed_first() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = gated_registry(
            gate.clone(),
            &[
                ("report", 5usize, JobPriority::Low),
                ("otp", 5usize, JobPriority::High),
            ],
        );
        let (worker, store) = worker(registry, 1);
        let queue = worker.queue();

        let low = queue.enqueue("report", json!({})).await.unwrap();
        let high = queue.enqueue("otp", json!({})).await.unwrap();

        let mut tasks = JoinSet::new();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 1);
        assert_eq!(store.find_by_id(high).await.unwrap().unwrap().state, JobState::Running);
        assert_eq!(store.find_by_id(low).await.unwrap().unwrap().state, JobState::Pending);

        finish(&gate, &mut tasks).await;
    }

    #[tokio::test]
    async fn expired_claims_are_recovered_and_redispatched() {
        let gate = Arc::new(Semaphore::new(1000));
        let registry = gated_registry(gate.clone(), &[("image", 5usize, JobPriority::Normal)]);
        let (worker, store) = worker(registry, 5);
        let mut events = worker.subscribe();

        let job = store.insert(Job::immediate("image", json!({}))).await.unwrap();
        let now = Utc::now();
        store
            .claim(job.id, "dead-worker", now, now - chrono::Duration::seconds(1))
            .await
            .unwrap();

        let mut tasks = JoinSet::new();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 1);
        finish(&gate, &mut tasks).await;

        match events.recv().await.unwrap() {
            JobEvent::Recovered { job_id, attempts, state, .. } => {
                assert_eq!(job_id, job.id);
                assert_eq!(attempts, 1);
                assert_eq!(state, JobState::Pending);
            }
            other => panic!("expected recovery, got {other:?}"),
        }

        let stored = store.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn batch_filled_by_saturated_type_triggers_another_poll() {
        let gate = Arc::new(Semaphore::new(0));
        let registry = gated_registry(
            gate.clone(),
            &[
                ("image", 1usize, JobPriority::High),
                ("mail", 1usize, JobPriority::Low),
            ],
        );
        let store = Arc::new(InMemoryJobStore::new());
        let config = JobWorkerConfig {
            batch_size: 2,
            ..JobWorkerConfig::with_worker_id("worker-test")
        };
        let worker = JobWorker::new(
            store.clone(),
            Arc::new(registry),
            TestDependencies::new().into_server_deps(),
            config,
        );

        // Inserted directly so no enqueue wake-up is pending
        for _ in 0..3 {
            store.insert(Job::immediate("image", json!({}))).await.unwrap();
        }
        let mail = store
            .insert(Job::builder().job_type("mail").priority(JobPriority::Low).build())
            .await
            .unwrap();

        let mut tasks = JoinSet::new();
        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 1);
        assert_eq!(store.find_by_id(mail.id).await.unwrap().unwrap().state, JobState::Pending);
        tokio::time::timeout(Duration::from_millis(100), worker.wake.notified())
            .await
            .expect("saturated type should schedule an immediate re-poll");

        assert_eq!(worker.dispatch_due(&mut tasks).await.unwrap(), 1);
        assert_eq!(store.find_by_id(mail.id).await.unwrap().unwrap().state, JobState::Running);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), worker.wake.notified())
                .await
                .is_err()
        );

        finish(&gate, &mut tasks).await;
    }

    #[tokio::test]
    async fn store_outage_is_reported_to_the_caller() {
        let (worker, store) = worker(JobRegistry::new(), 5);
        store.set_unavailable(true);

        let mut tasks = JoinSet::new();
        assert!(matches!(
            worker.dispatch_due(&mut tasks).await,
            Err(DispatchError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (worker, _store) = worker(JobRegistry::new(), 5);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown))
            .await
            .unwrap()
            .unwrap();
    }
}
