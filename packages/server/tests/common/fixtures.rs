//! In-memory dispatcher fixtures.
//!
//! Starts a real `JobWorker` on an `InMemoryJobStore` with mock services, so
//! scenarios exercise the full enqueue → claim → run → record path without Docker.

use std::sync::Arc;
use std::time::Duration;

use dispatcher_core::kernel::jobs::{
    InMemoryJobStore, Job, JobQueue, JobRegistry, JobResult, JobState, JobWorker, JobWorkerConfig,
};
use dispatcher_core::kernel::TestDependencies;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// A worker running in the background plus handles to inspect it.
pub struct RunningWorker {
    pub worker: Arc<JobWorker>,
    pub store: Arc<InMemoryJobStore>,
    pub queue: JobQueue,
    shutdown: CancellationToken,
    handle: JoinHandle<JobResult<()>>,
}

impl RunningWorker {
    /// Start a worker with a short poll interval.
    pub fn start(registry: JobRegistry, deps: &TestDependencies, max_concurrency: usize) -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        Self::start_with_store(registry, deps, max_concurrency, store)
    }

    /// Start a worker on a store that may already hold jobs.
    pub fn start_with_store(
        registry: JobRegistry,
        deps: &TestDependencies,
        max_concurrency: usize,
        store: Arc<InMemoryJobStore>,
    ) -> Self {
        let worker = Arc::new(Self::build(registry, deps, max_concurrency, store.clone()));
        Self::spawn(worker, store)
    }

    /// Build the worker without running it (subscribe or enqueue first).
    pub fn build(
        registry: JobRegistry,
        deps: &TestDependencies,
        max_concurrency: usize,
        store: Arc<InMemoryJobStore>,
    ) -> JobWorker {
        init_tracing();

        let config = JobWorkerConfig {
            max_concurrency,
            poll_interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(20),
            shutdown_grace: Duration::from_secs(5),
            ..JobWorkerConfig::with_worker_id(format!("test-worker-{}", Uuid::new_v4()))
        };
        JobWorker::new(store, Arc::new(registry), deps.server_deps(), config)
    }

    pub fn spawn(worker: Arc<JobWorker>, store: Arc<InMemoryJobStore>) -> Self {
        let shutdown = CancellationToken::new();
        let queue = worker.queue();

        let handle = tokio::spawn({
            let worker = worker.clone();
            let shutdown = shutdown.clone();
            async move { worker.run(shutdown).await }
        });

        Self {
            worker,
            store,
            queue,
            shutdown,
            handle,
        }
    }

    /// Snapshot of one job.
    pub fn job(&self, id: Uuid) -> Job {
        self.store
            .jobs()
            .into_iter()
            .find(|j| j.id == id)
            .expect("job should exist")
    }

    /// Wait until the job reaches `state`.
    pub async fn wait_for_state(&self, id: Uuid, state: JobState) -> Job {
        wait_until(&format!("job {id} to reach {state:?}"), || {
            self.job(id).state == state
        })
        .await;
        self.job(id)
    }

    /// Cancel the worker and wait for it to drain.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("worker task panicked")
            .expect("worker returned an error");
    }
}

/// Poll `condition` every 10ms for up to 10 seconds.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub fn init_tracing() {
    // Run tests with: RUST_LOG=debug cargo test -- --nocapture
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
