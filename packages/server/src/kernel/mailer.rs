use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{BaseMailSender, MailMessage};

/// SendGrid v3 API endpoint for sending mail.
pub const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// SendGrid mail sender
pub struct SendGridMailer {
    api_key: String,
    sender: String,
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SendGridRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

impl SendGridMailer {
    /// Create a new SendGrid client sending as `sender`
    pub fn new(api_key: String, sender: String) -> Result<Self> {
        Self::with_endpoint(api_key, sender, SENDGRID_SEND_URL.to_string())
    }

    /// Create a client that posts to a custom endpoint (sandbox or proxy)
    pub fn with_endpoint(api_key: String, sender: String, endpoint: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            sender,
            endpoint,
            client,
        })
    }

    fn request<'a>(&'a self, message: &'a MailMessage) -> SendGridRequest<'a> {
        SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![Address { email: &message.to }],
            }],
            from: Address {
                email: &self.sender,
            },
            subject: &message.subject,
            content: vec![Content {
                content_type: "text/plain",
                value: &message.body,
            }],
        }
    }
}

#[async_trait]
impl BaseMailSender for SendGridMailer {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request(message))
            .send()
            .await
            .context("Failed to send SendGrid request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("SendGrid API error {}: {}", status, body);
        }

        tracing::debug!(to = %message.to, subject = %message.subject, "mail accepted");
        Ok(())
    }
}

/// Mail sender that only logs, for running without SendGrid credentials
pub struct LogMailSender;

#[async_trait]
impl BaseMailSender for LogMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        tracing::warn!(
            to = %message.to,
            subject = %message.subject,
            "LogMailSender: mail not sent, no SendGrid key configured"
        );
        Ok(())
    }
}
