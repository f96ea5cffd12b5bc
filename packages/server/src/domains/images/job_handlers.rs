//! Job handlers for the images domain.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::JobsConfig;
use crate::domains::images::jobs::OptimizeImage;
use crate::kernel::jobs::{JobDefinition, JobPayload, JobPriority, JobRegistry, JobResult};
use crate::kernel::ServerDeps;

/// Handle OptimizeImage.
pub async fn handle_optimize_image(job: OptimizeImage, deps: Arc<ServerDeps>) -> Result<()> {
    let image_url = job.image_url().unwrap_or("<none>");
    info!(image_url = %image_url, "Handling optimize image job");

    let response = deps
        .image_optimizer
        .optimize(&job.request)
        .await
        .with_context(|| format!("Failed to optimize image {}", image_url))?;

    debug!(image_url = %image_url, response = %response, "image optimized");
    Ok(())
}

/// Register all image job handlers with the registry.
///
/// Image work is bulk work, so it runs at low priority behind mail.
pub fn register_image_jobs(registry: &mut JobRegistry, config: &JobsConfig) -> JobResult<()> {
    registry.register::<OptimizeImage, _, _>(
        JobDefinition::builder()
            .name(OptimizeImage::JOB_TYPE)
            .priority(JobPriority::Low)
            .concurrency_limit(config.image_concurrency)
            .max_attempts(config.max_attempts)
            .lock_lifetime(config.lock_lifetime)
            .build(),
        |job, deps| async move { handle_optimize_image(job, deps).await },
    )
}
