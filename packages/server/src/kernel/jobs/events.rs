use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{ErrorKind, Job, JobState};

/// Capacity of the lifecycle broadcast channel. Slow subscribers lag and
/// drop events rather than blocking the dispatcher.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Job lifecycle events.
///
/// These events represent facts about the job lifecycle, not commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job was persisted by the enqueue API.
    Enqueued {
        job_id: Uuid,
        job_type: String,
        scheduled_at: DateTime<Utc>,
    },

    /// Job execution started.
    Started {
        job_id: Uuid,
        job_type: String,
        worker_id: String,
        attempt: i32,
    },

    /// Job completed successfully.
    Succeeded {
        job_id: Uuid,
        job_type: String,
        duration_ms: u64,
    },

    /// Job execution failed.
    Failed {
        job_id: Uuid,
        job_type: String,
        error: String,
        error_kind: ErrorKind,
        attempts: i32,
        will_retry: bool,
    },

    /// A running job's lock expired and the store took it back.
    Recovered {
        job_id: Uuid,
        job_type: String,
        attempts: i32,
        state: JobState,
    },
}

impl JobEvent {
    pub fn enqueued(job: &Job) -> Self {
        JobEvent::Enqueued {
            job_id: job.id,
            job_type: job.job_type.clone(),
            scheduled_at: job.scheduled_at,
        }
    }

    pub fn recovered(job: &Job) -> Self {
        JobEvent::Recovered {
            job_id: job.id,
            job_type: job.job_type.clone(),
            attempts: job.attempts,
            state: job.state,
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Enqueued { job_id, .. }
            | JobEvent::Started { job_id, .. }
            | JobEvent::Succeeded { job_id, .. }
            | JobEvent::Failed { job_id, .. }
            | JobEvent::Recovered { job_id, .. } => *job_id,
        }
    }

    pub fn job_type(&self) -> &str {
        match self {
            JobEvent::Enqueued { job_type, .. }
            | JobEvent::Started { job_type, .. }
            | JobEvent::Succeeded { job_type, .. }
            | JobEvent::Failed { job_type, .. }
            | JobEvent::Recovered { job_type, .. } => job_type,
        }
    }

    /// True for events after which the job will not run again.
    pub fn is_terminal(&self) -> bool {
        match self {
            JobEvent::Succeeded { .. } => true,
            JobEvent::Failed { will_retry, .. } => !will_retry,
            JobEvent::Recovered { state, .. } => state.is_terminal(),
            _ => false,
        }
    }
}

/// Sender side of the lifecycle channel. Sending never fails the caller.
#[derive(Debug, Clone)]
pub struct JobEvents {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for JobEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl JobEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}
