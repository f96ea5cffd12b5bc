//! Mail jobs - transactional emails sent in the background.
//!
//! Request handlers enqueue these and return immediately; the worker sends
//! the mail and retries on transport failures.

use serde::{Deserialize, Serialize};

use crate::kernel::jobs::JobPayload;

/// Job to email a one-time passcode.
///
/// # Usage
///
/// ```ignore
/// let job_id = queue.enqueue_job(&SendOtpMail::new("a@b.com", 123456)).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOtpMail {
    /// Recipient address
    pub to: String,
    /// Six-digit code; zero-padded when rendered
    pub otp: u32,
}

impl SendOtpMail {
    pub fn new(to: impl Into<String>, otp: u32) -> Self {
        Self { to: to.into(), otp }
    }

    /// The code as it appears in the mail.
    pub fn code(&self) -> String {
        format!("{:06}", self.otp)
    }
}

impl JobPayload for SendOtpMail {
    const JOB_TYPE: &'static str = "send-otp-mail";
}

/// Job to email a password reset link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendForgotPasswordMail {
    pub to: String,
    pub reset_link: String,
}

impl SendForgotPasswordMail {
    pub fn new(to: impl Into<String>, reset_link: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            reset_link: reset_link.into(),
        }
    }
}

impl JobPayload for SendForgotPasswordMail {
    const JOB_TYPE: &'static str = "send-forgot-password-mail";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_code_is_zero_padded() {
        assert_eq!(SendOtpMail::new("a@b.com", 42).code(), "000042");
        assert_eq!(SendOtpMail::new("a@b.com", 123456).code(), "123456");
    }

    #[test]
    fn otp_payload_shape() {
        let json = serde_json::to_value(SendOtpMail::new("a@b.com", 123456)).unwrap();
        assert_eq!(json, serde_json::json!({ "to": "a@b.com", "otp": 123456 }));
    }
}
