//! Handler execution wrapper.
//!
//! The `JobRunner` takes one claimed job and drives it to its next state:
//! - Looks up the job type in the registry
//! - Runs the handler, renewing the claim while it works
//! - Enforces the optional per-type timeout
//! - Records completion, a delayed retry, or terminal failure in the store
//!
//! # Architecture
//!
//! ```text
//! JobRunner::run(job)
//!     │
//!     ├─► heartbeat task (extend_lock every lock_lifetime / 2)
//!     ├─► JobRegistry::execute (deserialize + call handler, under timeout)
//!     └─► complete / retry / fail (conditional on our claim, retried while
//!         the store is unavailable)
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::{DispatchError, JobResult};
use super::events::{JobEvent, JobEvents};
use super::job::{ErrorKind, Job};
use super::job_store::JobStore;
use super::registry::{JobDefinition, SharedJobRegistry};
use crate::kernel::ServerDeps;

/// Claim lifetime for jobs whose type is not registered. They are failed
/// right away, so this only matters if the worker dies in between.
pub(crate) const UNKNOWN_TYPE_LOCK_LIFETIME: Duration = Duration::from_secs(60);

/// What happened to a job after one run.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    /// Back to pending until `run_at`.
    Retrying {
        attempts: i32,
        run_at: chrono::DateTime<Utc>,
        error: String,
    },
    /// Terminal failure.
    Failed { attempts: i32, error: String },
    /// Our claim was gone when we tried to record the result, usually because
    /// lock-expiry recovery handed the job to someone else.
    Lost,
}

/// Store write that records the result of a run.
#[derive(Debug, Clone, Copy)]
enum OutcomeWrite<'a> {
    Complete,
    Retry {
        error: &'a str,
        run_at: chrono::DateTime<Utc>,
    },
    Fail {
        error: &'a str,
    },
}

pub struct JobRunner {
    store: Arc<dyn JobStore>,
    registry: SharedJobRegistry,
    deps: Arc<ServerDeps>,
    worker_id: String,
    events: JobEvents,
    write_backoff: Duration,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        registry: SharedJobRegistry,
        deps: Arc<ServerDeps>,
        worker_id: impl Into<String>,
        events: JobEvents,
    ) -> Self {
        Self {
            store,
            registry,
            deps,
            worker_id: worker_id.into(),
            events,
            write_backoff: Duration::from_secs(1),
        }
    }

    /// Pause between attempts to record an outcome while the store is down.
    pub fn with_write_backoff(mut self, backoff: Duration) -> Self {
        self.write_backoff = backoff;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run a job that this worker has already claimed.
    ///
    /// Handler errors never surface here; they end up in the job row. Recording
    /// the outcome is retried while the store is unavailable, for as long as
    /// the claim can still be ours. The only error returned is a store failure
    /// that outlasts the claim, in which case lock-expiry recovery picks it up.
    pub async fn run(&self, job: Job) -> JobResult<JobOutcome> {
        let definition = match self.registry.lookup(&job.job_type) {
            Ok(definition) => definition,
            Err(e) => {
                error!(job_id = %job.id, job_type = %job.job_type, "no handler registered for claimed job");
                return self
                    .record_failure(&job, None, e.to_string(), ErrorKind::NonRetryable)
                    .await;
            }
        };

        self.events.emit(JobEvent::Started {
            job_id: job.id,
            job_type: job.job_type.clone(),
            worker_id: self.worker_id.clone(),
            attempt: job.attempts + 1,
        });
        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts + 1, "executing job");

        let started = Instant::now();
        let result = self.execute_with_heartbeat(&job, definition).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                let written = self
                    .write_outcome(&job, OutcomeWrite::Complete, definition.lock_lifetime)
                    .await?;
                if !written {
                    warn!(job_id = %job.id, job_type = %job.job_type, "claim lost before completion was recorded");
                    return Ok(JobOutcome::Lost);
                }
                info!(job_id = %job.id, job_type = %job.job_type, duration_ms, "job succeeded");
                self.events.emit(JobEvent::Succeeded {
                    job_id: job.id,
                    job_type: job.job_type.clone(),
                    duration_ms,
                });
                Ok(JobOutcome::Completed)
            }
            Err((kind, message)) => {
                self.record_failure(&job, Some(definition), message, kind)
                    .await
            }
        }
    }

    /// Execute the handler with periodic lock renewal and the optional timeout.
    async fn execute_with_heartbeat(
        &self,
        job: &Job,
        definition: &JobDefinition,
    ) -> Result<(), (ErrorKind, String)> {
        let cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat(
            self.store.clone(),
            job.id,
            self.worker_id.clone(),
            definition.lock_lifetime,
            cancel.clone(),
        ));

        let execution = AssertUnwindSafe(self.registry.execute(job, self.deps.clone()))
            .catch_unwind()
            .map(|result| match result {
                Ok(result) => result.map_err(|e| (e.kind(), e.to_string())),
                Err(_) => Err((
                    ErrorKind::Retryable,
                    DispatchError::HandlerFailure {
                        job_type: job.job_type.clone(),
                        message: "handler panicked".into(),
                    }
                    .to_string(),
                )),
            });

        let result = match definition.timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(result) => result,
                Err(_) => Err((
                    ErrorKind::TimedOut,
                    format!("handler timed out after {}ms", limit.as_millis()),
                )),
            },
            None => execution.await,
        };

        cancel.cancel();
        if let Err(e) = heartbeat.await {
            error!(job_id = %job.id, error = %e, "heartbeat task aborted");
        }

        result
    }

    async fn record_failure(
        &self,
        job: &Job,
        definition: Option<&JobDefinition>,
        error: String,
        kind: ErrorKind,
    ) -> JobResult<JobOutcome> {
        let attempts = job.attempts + 1;
        let now = Utc::now();
        let window = definition
            .map(|d| d.lock_lifetime)
            .unwrap_or(UNKNOWN_TYPE_LOCK_LIFETIME);

        let retry_at = definition
            .filter(|_| kind.should_retry() && attempts < job.max_attempts)
            .map(|definition| {
                let delay = chrono::Duration::from_std(definition.retry_delay(attempts))
                    .unwrap_or_else(|_| chrono::Duration::hours(1));
                now + delay
            });

        let outcome = match retry_at {
            Some(run_at) => {
                let write = OutcomeWrite::Retry {
                    error: &error,
                    run_at,
                };
                if !self.write_outcome(job, write, window).await? {
                    warn!(job_id = %job.id, job_type = %job.job_type, "claim lost before retry was recorded");
                    return Ok(JobOutcome::Lost);
                }
                warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts,
                    max_attempts = job.max_attempts,
                    retry_at = %run_at,
                    error = %error,
                    "job failed, will retry"
                );
                JobOutcome::Retrying {
                    attempts,
                    run_at,
                    error: error.clone(),
                }
            }
            None => {
                let write = OutcomeWrite::Fail { error: &error };
                if !self.write_outcome(job, write, window).await? {
                    warn!(job_id = %job.id, job_type = %job.job_type, "claim lost before failure was recorded");
                    return Ok(JobOutcome::Lost);
                }
                error!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts,
                    error_kind = ?kind,
                    error = %error,
                    "job failed permanently"
                );
                JobOutcome::Failed {
                    attempts,
                    error: error.clone(),
                }
            }
        };

        self.events.emit(JobEvent::Failed {
            job_id: job.id,
            job_type: job.job_type.clone(),
            error,
            error_kind: kind,
            attempts,
            will_retry: matches!(outcome, JobOutcome::Retrying { .. }),
        });

        Ok(outcome)
    }

    /// Apply `write`, backing off and retrying while the store is unavailable.
    ///
    /// Gives up once `window` has passed: by then the lock has expired and the
    /// job belongs to recovery. Until then the caller keeps its concurrency
    /// slots, so the running row is still counted.
    async fn write_outcome(
        &self,
        job: &Job,
        write: OutcomeWrite<'_>,
        window: Duration,
    ) -> JobResult<bool> {
        let deadline = Instant::now() + window;
        loop {
            let now = Utc::now();
            let result = match write {
                OutcomeWrite::Complete => self.store.complete(job.id, &self.worker_id, now).await,
                OutcomeWrite::Retry { error, run_at } => {
                    self.store
                        .retry(job.id, &self.worker_id, error, run_at, now)
                        .await
                }
                OutcomeWrite::Fail { error } => {
                    self.store.fail(job.id, &self.worker_id, error, now).await
                }
            };

            match result {
                Err(DispatchError::StoreUnavailable(message))
                    if Instant::now() + self.write_backoff < deadline =>
                {
                    warn!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        error = %message,
                        backoff_ms = self.write_backoff.as_millis() as u64,
                        "store unavailable while recording outcome, retrying"
                    );
                    tokio::time::sleep(self.write_backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// Keep extending the claim until cancelled or the claim is lost.
async fn heartbeat(
    store: Arc<dyn JobStore>,
    job_id: uuid::Uuid,
    worker_id: String,
    lock_lifetime: Duration,
    cancel: CancellationToken,
) {
    let period = (lock_lifetime / 2).max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let locked_until = Utc::now()
                    + chrono::Duration::from_std(lock_lifetime)
                        .unwrap_or_else(|_| chrono::Duration::minutes(10));
                match store.extend_lock(job_id, &worker_id, locked_until).await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!(job_id = %job_id, "claim lost while handler is running");
                        break;
                    }
                    Err(e) => warn!(job_id = %job_id, error = %e, "heartbeat failed"),
                }
            }
        }
    }
}
