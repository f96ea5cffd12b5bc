use anyhow::{Context, Result};
use async_trait::async_trait;

use super::BaseImageOptimizer;

/// Client for the external image optimization service.
///
/// The service authenticates with a raw `token` header rather than a bearer
/// token.
pub struct HttpImageOptimizer {
    url: String,
    api_token: String,
    client: reqwest::Client,
}

impl HttpImageOptimizer {
    pub fn new(url: String, api_token: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            url,
            api_token,
            client,
        })
    }
}

#[async_trait]
impl BaseImageOptimizer for HttpImageOptimizer {
    async fn optimize(&self, request: &serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(&self.url)
            .header("token", &self.api_token)
            .json(request)
            .send()
            .await
            .context("Failed to send image optimizer request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Image optimizer error {}: {}", status, body);
        }

        // Some deployments answer with an empty body
        let body = response
            .text()
            .await
            .context("Failed to read image optimizer response")?;
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }

        serde_json::from_str(&body).context("Failed to parse image optimizer response")
    }
}

/// No-op optimizer for running without IMAGE_OPTIMIZER_URL
pub struct NoopImageOptimizer;

#[async_trait]
impl BaseImageOptimizer for NoopImageOptimizer {
    async fn optimize(&self, _request: &serde_json::Value) -> Result<serde_json::Value> {
        tracing::warn!("NoopImageOptimizer: optimize called but no IMAGE_OPTIMIZER_URL configured");
        Ok(serde_json::Value::Null)
    }
}
