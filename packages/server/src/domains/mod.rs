// Business domains
pub mod images;
pub mod mail;

use crate::config::JobsConfig;
use crate::kernel::jobs::{JobRegistry, JobResult};

/// Build the registry with every job type the worker knows about.
pub fn build_job_registry(config: &JobsConfig) -> JobResult<JobRegistry> {
    let mut registry = JobRegistry::new();
    mail::register_mail_jobs(&mut registry, config)?;
    images::register_image_jobs(&mut registry, config)?;
    Ok(registry)
}
