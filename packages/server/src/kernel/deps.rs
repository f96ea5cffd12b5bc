//! Server dependencies for job handlers (using traits for testability)
//!
//! This module provides the central dependency container passed to every job
//! handler. All external services use trait abstractions to enable testing.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::kernel::{
    BaseImageOptimizer, BaseMailSender, HttpImageOptimizer, LogMailSender, NoopImageOptimizer,
    SendGridMailer,
};

/// Server dependencies accessible to handlers (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub mailer: Arc<dyn BaseMailSender>,
    pub image_optimizer: Arc<dyn BaseImageOptimizer>,
}

impl ServerDeps {
    /// Create new ServerDeps with the given dependencies
    pub fn new(
        mailer: Arc<dyn BaseMailSender>,
        image_optimizer: Arc<dyn BaseImageOptimizer>,
    ) -> Self {
        Self {
            mailer,
            image_optimizer,
        }
    }

    /// Build real clients from configuration, falling back to logging no-ops
    /// for services that are not configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mailer: Arc<dyn BaseMailSender> = match (&config.sendgrid_key, &config.email_sender) {
            (Some(key), Some(sender)) => Arc::new(SendGridMailer::with_endpoint(
                key.clone(),
                sender.clone(),
                config.sendgrid_url.clone(),
            )?),
            _ => {
                tracing::warn!("SENDGRID_KEY or EMAIL_SENDER not set, mail will only be logged");
                Arc::new(LogMailSender)
            }
        };

        let image_optimizer: Arc<dyn BaseImageOptimizer> = match &config.image_optimizer_url {
            Some(url) => Arc::new(HttpImageOptimizer::new(
                url.clone(),
                config.api_token.clone().unwrap_or_default(),
            )?),
            None => {
                tracing::warn!("IMAGE_OPTIMIZER_URL not set, image jobs will be no-ops");
                Arc::new(NoopImageOptimizer)
            }
        };

        Ok(Self::new(mailer, image_optimizer))
    }
}
