//! In-memory job store.
//!
//! Same transition rules as [`PostgresJobStore`](super::PostgresJobStore), with a
//! single mutex standing in for row-level atomicity. Used by tests and when the
//! worker runs without `DATABASE_URL`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::{DispatchError, JobResult};
use super::job::{Job, JobState};
use super::job_store::JobStore;

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    unavailable: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of all stored jobs.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot of stored jobs of one type.
    pub fn jobs_by_type(&self, job_type: &str) -> Vec<Job> {
        self.jobs()
            .into_iter()
            .filter(|j| j.job_type == job_type)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_jobs<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, Job>) -> R) -> JobResult<R> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DispatchError::StoreUnavailable(
                "in-memory store switched off".to_string(),
            ));
        }
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(f(&mut jobs))
    }

    /// Apply `f` to a running job owned by `worker_id`.
    fn with_owned_job(
        &self,
        id: Uuid,
        worker_id: &str,
        f: impl FnOnce(&mut Job),
    ) -> JobResult<bool> {
        self.with_jobs(|jobs| match jobs.get_mut(&id) {
            Some(job)
                if job.state == JobState::Running
                    && job.locked_by.as_deref() == Some(worker_id) =>
            {
                f(job);
                true
            }
            _ => false,
        })
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> JobResult<Job> {
        self.with_jobs(|jobs| {
            jobs.insert(job.id, job.clone());
            job
        })
    }

    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>> {
        self.with_jobs(|jobs| jobs.get(&id).cloned())
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        skip_types: &[String],
    ) -> JobResult<Vec<Job>> {
        self.with_jobs(|jobs| {
            let mut due: Vec<Job> = jobs
                .values()
                .filter(|j| j.is_due(now) && !skip_types.contains(&j.job_type))
                .cloned()
                .collect();
            due.sort_by_key(Job::dispatch_order);
            due.truncate(limit.max(0) as usize);
            due
        })
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> JobResult<Job> {
        self.with_jobs(|jobs| match jobs.get_mut(&id) {
            Some(job) if job.is_due(now) => {
                job.state = JobState::Running;
                job.locked_by = Some(worker_id.to_string());
                job.locked_until = Some(locked_until);
                job.updated_at = now;
                Ok(job.clone())
            }
            _ => Err(DispatchError::ClaimConflict(id)),
        })?
    }

    async fn complete(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> JobResult<bool> {
        self.with_owned_job(id, worker_id, |job| {
            job.state = JobState::Completed;
            job.locked_by = None;
            job.locked_until = None;
            job.completed_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        self.with_owned_job(id, worker_id, |job| {
            job.state = JobState::Pending;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.scheduled_at = run_at;
            job.locked_by = None;
            job.locked_until = None;
            job.updated_at = now;
        })
    }

    async fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        self.with_owned_job(id, worker_id, |job| {
            job.state = JobState::Failed;
            job.attempts += 1;
            job.last_error = Some(error.to_string());
            job.locked_by = None;
            job.locked_until = None;
            job.completed_at = Some(now);
            job.updated_at = now;
        })
    }

    async fn extend_lock(
        &self,
        id: Uuid,
        worker_id: &str,
        locked_until: DateTime<Utc>,
    ) -> JobResult<bool> {
        self.with_owned_job(id, worker_id, |job| {
            job.locked_until = Some(locked_until);
            job.updated_at = Utc::now();
        })
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> JobResult<Vec<Job>> {
        self.with_jobs(|jobs| {
            jobs.values_mut()
                .filter(|j| j.is_lock_expired(now))
                .map(|job| {
                    let owner = job.locked_by.take();
                    job.attempts += 1;
                    job.last_error = Some(format!(
                        "lock expired while running on {}",
                        owner.as_deref().unwrap_or("unknown worker")
                    ));
                    job.locked_until = None;
                    job.updated_at = now;
                    if job.has_attempts_remaining() {
                        job.state = JobState::Pending;
                    } else {
                        job.state = JobState::Failed;
                        job.completed_at = Some(now);
                    }
                    job.clone()
                })
                .collect()
        })
    }

    async fn count_by_state(&self, job_type: &str, state: JobState) -> JobResult<i64> {
        self.with_jobs(|jobs| {
            jobs.values()
                .filter(|j| j.job_type == job_type && j.state == state)
                .count() as i64
        })
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> JobResult<u64> {
        self.with_jobs(|jobs| {
            let before = jobs.len();
            jobs.retain(|_, j| !(j.state.is_terminal() && j.updated_at < older_than));
            (before - jobs.len()) as u64
        })
    }
}
