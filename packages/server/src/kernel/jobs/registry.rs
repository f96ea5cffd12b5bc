//! Job registry for deserializing and executing jobs.
//!
//! The registry maps job type strings (e.g., "send-otp-mail") to:
//! - A [`JobDefinition`] carrying priority, concurrency and retry policy
//! - A handler that deserializes the JSON payload and runs the job logic
//!
//! The registry is built once at start-up with `&mut self` and then frozen
//! behind an `Arc`, so the scheduler only ever sees it read-only.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use typed_builder::TypedBuilder;

use super::error::{DispatchError, JobResult};
use super::job::{Job, JobPriority};
use crate::kernel::ServerDeps;

/// Type alias for the async handler function.
///
/// Handlers take the raw JSON payload and a reference to ServerDeps.
type BoxedHandler = Box<
    dyn Fn(serde_json::Value, Arc<ServerDeps>) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>
        + Send
        + Sync,
>;

/// Static configuration for one job type.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobDefinition {
    /// Unique job type name.
    pub name: String,
    #[builder(default)]
    pub priority: JobPriority,
    /// Maximum jobs of this type running at once in one dispatcher.
    #[builder(default = 5)]
    pub concurrency_limit: usize,
    /// Failures allowed before the job is marked failed for good.
    #[builder(default = 3)]
    pub max_attempts: i32,
    #[builder(default = Duration::from_secs(1))]
    pub backoff_base: Duration,
    #[builder(default = Duration::from_secs(3600))]
    pub backoff_max: Duration,
    /// How long a claim stays valid without a heartbeat.
    #[builder(default = Duration::from_secs(600))]
    pub lock_lifetime: Duration,
    /// Optional deadline for a single handler run.
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

impl JobDefinition {
    /// Delay before the next attempt after `attempts` failures.
    ///
    /// `backoff_base * 2^(attempts - 1)`, capped at `backoff_max`.
    pub fn retry_delay(&self, attempts: i32) -> Duration {
        let exponent = attempts.saturating_sub(1).clamp(0, 31) as u32;
        self.backoff_base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Registration entry containing the definition and handler.
struct JobRegistration {
    definition: JobDefinition,
    handler: BoxedHandler,
}

/// Registry that maps job type strings to handlers.
///
/// # Example
///
/// ```ignore
/// let mut registry = JobRegistry::new();
///
/// registry.register::<SendOtpMail, _, _>(
///     JobDefinition::builder()
///         .name(SendOtpMail::JOB_TYPE)
///         .priority(JobPriority::High)
///         .concurrency_limit(10usize)
///         .build(),
///     |job, deps| async move { handle_send_otp_mail(job, deps).await },
/// )?;
///
/// let registry = Arc::new(registry);
/// ```
#[derive(Default)]
pub struct JobRegistry {
    registrations: HashMap<String, JobRegistration>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type with its handler.
    ///
    /// Fails with [`DispatchError::DuplicateType`] if the name is taken.
    pub fn register<P, F, Fut>(&mut self, definition: JobDefinition, handler: F) -> JobResult<()>
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Arc<ServerDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.registrations.contains_key(&definition.name) {
            return Err(DispatchError::DuplicateType(definition.name));
        }

        let job_type = definition.name.clone();
        let boxed_handler: BoxedHandler = Box::new(move |value, deps| {
            let handler = handler.clone();
            let job_type = job_type.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value).map_err(|e| {
                    DispatchError::InvalidPayload {
                        job_type,
                        message: e.to_string(),
                    }
                })?;
                handler(payload, deps).await
            })
        });

        self.registrations.insert(
            definition.name.clone(),
            JobRegistration {
                definition,
                handler: boxed_handler,
            },
        );

        Ok(())
    }

    /// Look up the definition for a job type.
    pub fn lookup(&self, job_type: &str) -> JobResult<&JobDefinition> {
        self.registrations
            .get(job_type)
            .map(|r| &r.definition)
            .ok_or_else(|| DispatchError::UnknownType(job_type.to_string()))
    }

    /// Execute a claimed job using its registered handler.
    ///
    /// Returns an error if:
    /// - The job type is not registered (`UnknownType`)
    /// - The JSON payload cannot be deserialized (`InvalidPayload`)
    /// - The handler returns an error (`HandlerFailure`)
    pub async fn execute(&self, job: &Job, deps: Arc<ServerDeps>) -> JobResult<()> {
        let registration = self
            .registrations
            .get(&job.job_type)
            .ok_or_else(|| DispatchError::UnknownType(job.job_type.clone()))?;

        (registration.handler)(job.payload.clone(), deps)
            .await
            .map_err(|e| match e.downcast::<DispatchError>() {
                Ok(dispatch_error) => dispatch_error,
                Err(other) => DispatchError::HandlerFailure {
                    job_type: job.job_type.clone(),
                    message: format!("{:#}", other),
                },
            })
    }

    /// Check if a job type is registered.
    pub fn is_registered(&self, job_type: &str) -> bool {
        self.registrations.contains_key(job_type)
    }

    /// All registered definitions.
    pub fn definitions(&self) -> impl Iterator<Item = &JobDefinition> {
        self.registrations.values().map(|r| &r.definition)
    }

    /// Get all registered job types.
    pub fn registered_types(&self) -> Vec<&str> {
        self.registrations.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("registered_types", &self.registered_types())
            .finish()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedJobRegistry = Arc<JobRegistry>;
