//! Error taxonomy for the job dispatch layer.
//!
//! Enqueue callers only ever see `UnknownType`, `InvalidPayload` (when the
//! payload cannot be serialized) and `StoreUnavailable`. Everything else is
//! internal to the dispatcher and shows up in job state or logs.

use uuid::Uuid;

use super::job::ErrorKind;

/// Result alias used throughout the jobs module.
pub type JobResult<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The job type has no registered handler.
    #[error("unknown job type: {0}")]
    UnknownType(String),

    /// A job type was registered twice at start-up.
    #[error("job type already registered: {0}")]
    DuplicateType(String),

    /// Another worker claimed the job first.
    #[error("job {0} was claimed by another worker")]
    ClaimConflict(Uuid),

    /// The handler ran and reported a failure.
    #[error("handler for {job_type} failed: {message}")]
    HandlerFailure { job_type: String, message: String },

    /// The payload does not match what the handler expects.
    #[error("invalid payload for {job_type}: {message}")]
    InvalidPayload { job_type: String, message: String },

    /// The job store could not be reached or rejected the query.
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job not found: {0}")]
    JobNotFound(Uuid),
}

impl DispatchError {
    /// How the execution wrapper should treat this error when it comes out of a
    /// handler run.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownType(_) | DispatchError::InvalidPayload { .. } => {
                ErrorKind::NonRetryable
            }
            _ => ErrorKind::Retryable,
        }
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DispatchError::StoreUnavailable("row not found".into()),
            other => DispatchError::StoreUnavailable(other.to_string()),
        }
    }
}
