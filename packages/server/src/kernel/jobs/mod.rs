//! Job infrastructure for background work.
//!
//! This module provides the kernel-level infrastructure for job execution:
//! - [`JobRegistry`] - Maps job type names to definitions and typed handlers
//! - [`JobQueue`] - Enqueue API used by request handlers and services
//! - [`JobWorker`] - Long-running scheduler that claims and dispatches due jobs
//! - [`JobRunner`] - Runs one claimed job and records its outcome
//! - [`JobStore`] - Persistence, with [`PostgresJobStore`] and [`InMemoryJobStore`]
//!
//! # Architecture
//!
//! ```text
//! Request handler calls queue.enqueue_job(&SendOtpMail { .. })
//!     │
//!     └─► JobQueue: validate type, insert pending row, wake worker
//!
//! JobWorker
//!     │
//!     ├─► Recover expired claims
//!     ├─► Claim due jobs (global + per-type slots)
//!     └─► JobRunner
//!             ├─► JobRegistry::execute (deserialize payload, call handler)
//!             └─► complete / retry with backoff / fail
//! ```
//!
//! # Domain-Specific Jobs
//!
//! Payload structs and handlers live in their respective domains.
//! This module only provides the infrastructure - business logic stays in domains.

mod error;
pub mod events;
mod job;
mod job_store;
mod memory_store;
mod queue;
mod registry;
mod runner;
mod worker;

pub use error::{DispatchError, JobResult};
pub use events::{JobEvent, JobEvents};
pub use job::{ErrorKind, Job, JobPriority, JobState};
pub use job_store::{JobStore, PostgresJobStore};
pub use memory_store::InMemoryJobStore;
pub use queue::{JobPayload, JobQueue};
pub use registry::{JobDefinition, JobRegistry, SharedJobRegistry};
pub use runner::{JobOutcome, JobRunner};
pub use worker::{JobWorker, JobWorkerConfig};
