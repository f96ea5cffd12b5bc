//! Job handlers for the mail domain.
//!
//! These handlers are registered with the JobRegistry and called by the JobRunner.
//! A send error is returned as-is so the runner can retry it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::JobsConfig;
use crate::domains::mail::jobs::{SendForgotPasswordMail, SendOtpMail};
use crate::kernel::jobs::{JobDefinition, JobPayload, JobPriority, JobRegistry, JobResult};
use crate::kernel::{MailMessage, ServerDeps};

/// Handle SendOtpMail.
pub async fn handle_send_otp_mail(job: SendOtpMail, deps: Arc<ServerDeps>) -> Result<()> {
    info!(to = %job.to, "Handling send OTP mail job");

    let message = MailMessage::new(
        &job.to,
        "Your verification code",
        format!(
            "Your verification code is {}.\n\nIf you did not request this code, you can ignore this email.",
            job.code()
        ),
    );

    deps.mailer
        .send(&message)
        .await
        .with_context(|| format!("Failed to send OTP mail to {}", job.to))
}

/// Handle SendForgotPasswordMail.
pub async fn handle_send_forgot_password_mail(
    job: SendForgotPasswordMail,
    deps: Arc<ServerDeps>,
) -> Result<()> {
    info!(to = %job.to, "Handling forgot password mail job");

    let message = MailMessage::new(
        &job.to,
        "Reset your password",
        format!(
            "We received a request to reset your password.\n\nOpen this link to choose a new one:\n{}\n\nIf you did not ask for a reset, you can ignore this email.",
            job.reset_link
        ),
    );

    deps.mailer
        .send(&message)
        .await
        .with_context(|| format!("Failed to send password reset mail to {}", job.to))
}

/// Register all mail job handlers with the registry.
///
/// Call this at startup; both mail types run at high priority.
pub fn register_mail_jobs(registry: &mut JobRegistry, config: &JobsConfig) -> JobResult<()> {
    registry.register::<SendOtpMail, _, _>(
        mail_definition(SendOtpMail::JOB_TYPE, config),
        |job, deps| async move { handle_send_otp_mail(job, deps).await },
    )?;

    registry.register::<SendForgotPasswordMail, _, _>(
        mail_definition(SendForgotPasswordMail::JOB_TYPE, config),
        |job, deps| async move { handle_send_forgot_password_mail(job, deps).await },
    )?;

    Ok(())
}

fn mail_definition(name: &str, config: &JobsConfig) -> JobDefinition {
    JobDefinition::builder()
        .name(name)
        .priority(JobPriority::High)
        .concurrency_limit(config.mail_concurrency)
        .max_attempts(config.max_attempts)
        .lock_lifetime(config.lock_lifetime)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{MockMailSender, TestDependencies};

    #[tokio::test]
    async fn otp_mail_renders_padded_code() {
        let test_deps = TestDependencies::new();
        handle_send_otp_mail(SendOtpMail::new("a@b.com", 7), test_deps.server_deps())
            .await
            .unwrap();

        let sent = test_deps.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@b.com");
        assert!(sent[0].body.contains("000007"));
    }

    #[tokio::test]
    async fn forgot_password_mail_contains_link() {
        let test_deps = TestDependencies::new();
        let job = SendForgotPasswordMail::new("a@b.com", "https://example.org/reset/abc");
        handle_send_forgot_password_mail(job, test_deps.server_deps())
            .await
            .unwrap();

        assert!(test_deps.mailer.sent()[0]
            .body
            .contains("https://example.org/reset/abc"));
    }

    #[tokio::test]
    async fn transport_failure_is_propagated() {
        let test_deps = TestDependencies::new().mock_mailer(MockMailSender::new().always_failing());
        let err = handle_send_otp_mail(SendOtpMail::new("a@b.com", 1), test_deps.server_deps())
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Failed to send OTP mail to a@b.com"));
    }

    #[test]
    fn mail_jobs_are_high_priority() {
        let mut registry = JobRegistry::new();
        register_mail_jobs(&mut registry, &JobsConfig::default()).unwrap();

        for job_type in [SendOtpMail::JOB_TYPE, SendForgotPasswordMail::JOB_TYPE] {
            let definition = registry.lookup(job_type).unwrap();
            assert_eq!(definition.priority, JobPriority::High);
            assert_eq!(definition.concurrency_limit, 10);
        }
    }
}
