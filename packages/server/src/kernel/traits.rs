// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (like "which mail to send for a password reset") lives in domain handlers.
//
// Naming convention: Base* for trait names (e.g., BaseMailSender, BaseImageOptimizer)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Mail Sender Trait (Infrastructure - transactional email)
// =============================================================================

/// A single outgoing email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
}

impl MailMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait BaseMailSender: Send + Sync {
    /// Send one message. An error means the message was not accepted.
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

// =============================================================================
// Image Optimizer Trait (Infrastructure - external HTTP service)
// =============================================================================

#[async_trait]
pub trait BaseImageOptimizer: Send + Sync {
    /// Submit an optimization request; returns the service's JSON response
    async fn optimize(&self, request: &serde_json::Value) -> Result<serde_json::Value>;
}
