//! Job model for background job execution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Terminal states are never picked up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_priority", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for ordering (lower = higher priority)
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::High => 0,
            JobPriority::Normal => 1,
            JobPriority::Low => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
    /// Handler ran past its deadline - will retry if attempts remain
    TimedOut,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable | ErrorKind::TimedOut)
    }
}

// ============================================================================
// Job Model
// ============================================================================

#[derive(FromRow, Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub job_type: String,

    #[builder(default = serde_json::Value::Null)]
    pub payload: serde_json::Value,

    #[builder(default)]
    pub priority: JobPriority,
    #[builder(default)]
    pub state: JobState,

    #[builder(default = Utc::now())]
    pub scheduled_at: DateTime<Utc>,

    #[builder(default = 0)]
    pub attempts: i32,
    #[builder(default = 3)]
    pub max_attempts: i32,
    #[builder(default, setter(strip_option))]
    pub last_error: Option<String>,

    // Claim management
    #[builder(default, setter(strip_option))]
    pub locked_by: Option<String>,
    #[builder(default, setter(strip_option))]
    pub locked_until: Option<DateTime<Utc>>,

    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create an immediate job (convenience constructor)
    pub fn immediate(job_type: &str, payload: serde_json::Value) -> Self {
        Self::builder().job_type(job_type).payload(payload).build()
    }

    /// Create a job that becomes due at `run_at` (convenience constructor)
    pub fn scheduled(job_type: &str, payload: serde_json::Value, run_at: DateTime<Utc>) -> Self {
        Self::builder()
            .job_type(job_type)
            .payload(payload)
            .scheduled_at(run_at)
            .build()
    }

    /// Pending and past its scheduled time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.scheduled_at <= now
    }

    /// Running with a lock that nobody renewed in time.
    pub fn is_lock_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Running && self.locked_until.is_some_and(|until| until < now)
    }

    /// Whether another failure would still leave room for a retry.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Sort key used by every store: higher priority first, then oldest.
    pub fn dispatch_order(&self) -> (i16, DateTime<Utc>) {
        (self.priority.as_i16(), self.scheduled_at)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn sample_job() -> Job {
        Job::immediate("test_job", serde_json::json!({ "n": 1 }))
    }

    #[test]
    fn new_job_starts_pending_with_no_attempts() {
        let job = sample_job();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert!(job.locked_by.is_none());
    }

    #[test]
    fn new_job_has_normal_priority_by_default() {
        assert_eq!(sample_job().priority, JobPriority::Normal);
    }

    #[test]
    fn scheduled_job_is_not_due_before_run_at() {
        let now = Utc::now();
        let job = Job::scheduled("test_job", serde_json::Value::Null, now + Duration::minutes(5));
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::minutes(5)));
    }

    #[test]
    fn running_job_is_not_due() {
        let mut job = sample_job();
        job.state = JobState::Running;
        assert!(!job.is_due(Utc::now() + Duration::hours(1)));
    }

    #[test]
    fn lock_expiry_only_applies_to_running_jobs() {
        let now = Utc::now();
        let mut job = sample_job();
        job.locked_until = Some(now - Duration::seconds(1));
        assert!(!job.is_lock_expired(now));

        job.state = JobState::Running;
        assert!(job.is_lock_expired(now));

        job.locked_until = Some(now + Duration::seconds(30));
        assert!(!job.is_lock_expired(now));
    }

    #[test]
    fn priority_ordering_is_correct() {
        assert!(JobPriority::High.as_i16() < JobPriority::Normal.as_i16());
        assert!(JobPriority::Normal.as_i16() < JobPriority::Low.as_i16());
    }

    #[test]
    fn dispatch_order_prefers_priority_then_age() {
        let now = Utc::now();
        let old_low = Job::builder()
            .job_type("a")
            .priority(JobPriority::Low)
            .scheduled_at(now - Duration::hours(1))
            .build();
        let new_high = Job::builder()
            .job_type("b")
            .priority(JobPriority::High)
            .scheduled_at(now)
            .build();
        let old_high = Job::builder()
            .job_type("c")
            .priority(JobPriority::High)
            .scheduled_at(now - Duration::minutes(1))
            .build();

        let mut jobs = vec![old_low, new_high, old_high];
        jobs.sort_by_key(Job::dispatch_order);
        let order: Vec<_> = jobs.iter().map(|j| j.job_type.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn retryable_error_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(ErrorKind::TimedOut.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }
}
