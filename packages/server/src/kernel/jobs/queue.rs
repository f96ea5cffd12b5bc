//! Enqueue API.
//!
//! This is the only mutation path external collaborators (HTTP handlers,
//! other services) have into the job system. It validates the job type
//! against the registry, persists a pending job and returns its id without
//! waiting for execution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use super::error::{DispatchError, JobResult};
use super::events::{JobEvent, JobEvents};
use super::job::Job;
use super::job_store::JobStore;
use super::registry::SharedJobRegistry;

/// Payload structs that know which job type they belong to.
pub trait JobPayload: Serialize + Send + Sync {
    /// The job type identifier used in the jobs table.
    const JOB_TYPE: &'static str;
}

/// Handle for submitting jobs.
///
/// Cheap to clone; share one per process.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
    events: Option<JobEvents>,
    wake: Option<Arc<Notify>>,
}

impl JobQueue {
    /// Create a queue that only writes to the store.
    ///
    /// Use [`JobWorker::queue`](super::JobWorker::queue) instead when the
    /// dispatcher runs in the same process, so new jobs wake it immediately.
    pub fn new(store: Arc<dyn JobStore>, registry: SharedJobRegistry) -> Self {
        Self {
            store,
            registry,
            events: None,
            wake: None,
        }
    }

    pub(crate) fn with_dispatcher(mut self, events: JobEvents, wake: Arc<Notify>) -> Self {
        self.events = Some(events);
        self.wake = Some(wake);
        self
    }

    /// Enqueue a job for immediate execution.
    pub async fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> JobResult<Uuid> {
        self.schedule(job_type, payload, Utc::now()).await
    }

    /// Schedule a job to become due at `run_at`.
    pub async fn schedule(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
    ) -> JobResult<Uuid> {
        let definition = self.registry.lookup(job_type)?;

        let job = Job::builder()
            .job_type(job_type)
            .payload(payload)
            .priority(definition.priority)
            .max_attempts(definition.max_attempts)
            .scheduled_at(run_at)
            .build();

        let inserted = self.store.insert(job).await?;

        debug!(
            job_id = %inserted.id,
            job_type = %inserted.job_type,
            scheduled_at = %inserted.scheduled_at,
            "job enqueued"
        );

        if let Some(events) = &self.events {
            events.emit(JobEvent::enqueued(&inserted));
        }
        if let Some(wake) = &self.wake {
            if inserted.scheduled_at <= Utc::now() {
                wake.notify_one();
            }
        }

        Ok(inserted.id)
    }

    /// Enqueue a typed payload for immediate execution.
    pub async fn enqueue_job<P: JobPayload>(&self, payload: &P) -> JobResult<Uuid> {
        self.enqueue(P::JOB_TYPE, to_payload::<P>(payload)?).await
    }

    /// Schedule a typed payload for `run_at`.
    pub async fn schedule_job<P: JobPayload>(
        &self,
        payload: &P,
        run_at: DateTime<Utc>,
    ) -> JobResult<Uuid> {
        self.schedule(P::JOB_TYPE, to_payload::<P>(payload)?, run_at)
            .await
    }

    /// Look up a job for status queries.
    pub async fn find(&self, job_id: Uuid) -> JobResult<Job> {
        self.store
            .find_by_id(job_id)
            .await?
            .ok_or(DispatchError::JobNotFound(job_id))
    }
}

fn to_payload<P: JobPayload>(payload: &P) -> JobResult<serde_json::Value> {
    serde_json::to_value(payload).map_err(|e| DispatchError::InvalidPayload {
        job_type: P::JOB_TYPE.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::kernel::jobs::{
        InMemoryJobStore, JobDefinition, JobPriority, JobRegistry, JobState,
    };

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl JobPayload for Ping {
        const JOB_TYPE: &'static str = "ping";
    }

    fn queue() -> (JobQueue, Arc<InMemoryJobStore>) {
        let mut registry = JobRegistry::new();
        registry
            .register::<Ping, _, _>(
                JobDefinition::builder()
                    .name(Ping::JOB_TYPE)
                    .priority(JobPriority::High)
                    .max_attempts(5)
                    .build(),
                |_job, _deps| async move { Ok(()) },
            )
            .unwrap();

        let store = Arc::new(InMemoryJobStore::new());
        (JobQueue::new(store.clone(), Arc::new(registry)), store)
    }

    #[tokio::test]
    async fn enqueue_persists_pending_job_with_definition_policy() {
        let (queue, store) = queue();
        let id = queue.enqueue_job(&Ping { n: 7 }).await.unwrap();

        let job = queue.find(id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.job_type, "ping");
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.max_attempts, 5);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload, serde_json::json!({ "n": 7 }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn enqueue_unknown_type_persists_nothing() {
        let (queue, store) = queue();
        let err = queue
            .enqueue("no-such-job", serde_json::json!({}))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownType(t) if t == "no-such-job"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn schedule_sets_run_at() {
        let (queue, _store) = queue();
        let run_at = Utc::now() + chrono::Duration::hours(2);
        let id = queue.schedule_job(&Ping { n: 1 }, run_at).await.unwrap();

        let job = queue.find(id).await.unwrap();
        assert_eq!(job.scheduled_at, run_at);
        assert!(!job.is_due(Utc::now()));
    }

    #[tokio::test]
    async fn enqueue_surfaces_store_outage() {
        let (queue, store) = queue();
        store.set_unavailable(true);
        let err = queue.enqueue_job(&Ping { n: 1 }).await.unwrap_err();
        assert!(matches!(err, DispatchError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn find_unknown_job() {
        let (queue, _store) = queue();
        let id = Uuid::now_v7();
        assert!(matches!(
            queue.find(id).await,
            Err(DispatchError::JobNotFound(missing)) if missing == id
        ));
    }
}
