use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::SENDGRID_SEND_URL;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the worker uses the in-memory store.
    pub database_url: Option<String>,
    pub email_sender: Option<String>,
    pub sendgrid_key: Option<String>,
    pub sendgrid_url: String,
    pub image_optimizer_url: Option<String>,
    pub api_token: Option<String>,
    pub jobs: JobsConfig,
}

/// Dispatcher tuning knobs
#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_attempts: i32,
    pub lock_lifetime: Duration,
    pub mail_concurrency: usize,
    pub image_concurrency: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 20,
            poll_interval: Duration::from_millis(5000),
            batch_size: 20,
            max_attempts: 3,
            lock_lifetime: Duration::from_millis(600_000),
            mail_concurrency: 10,
            image_concurrency: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = JobsConfig::default();

        Ok(Self {
            database_url: lookup("DATABASE_URL"),
            email_sender: lookup("EMAIL_SENDER"),
            sendgrid_key: lookup("SENDGRID_KEY"),
            sendgrid_url: lookup("SENDGRID_URL")
                .unwrap_or_else(|| SENDGRID_SEND_URL.to_string()),
            image_optimizer_url: lookup("IMAGE_OPTIMIZER_URL"),
            api_token: lookup("API_TOKEN"),
            jobs: JobsConfig {
                max_concurrency: parse_or(&lookup, "JOBS_MAX_CONCURRENCY", defaults.max_concurrency)?,
                poll_interval: Duration::from_millis(parse_or(
                    &lookup,
                    "JOBS_POLL_INTERVAL_MS",
                    defaults.poll_interval.as_millis() as u64,
                )?),
                batch_size: parse_or(&lookup, "JOBS_BATCH_SIZE", defaults.batch_size)?,
                max_attempts: parse_or(&lookup, "JOBS_MAX_ATTEMPTS", defaults.max_attempts)?,
                lock_lifetime: Duration::from_millis(parse_or(
                    &lookup,
                    "JOBS_LOCK_LIFETIME_MS",
                    defaults.lock_lifetime.as_millis() as u64,
                )?),
                mail_concurrency: parse_or(&lookup, "MAIL_CONCURRENCY", defaults.mail_concurrency)?,
                image_concurrency: parse_or(
                    &lookup,
                    "IMAGE_CONCURRENCY",
                    defaults.image_concurrency,
                )?,
            },
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}
