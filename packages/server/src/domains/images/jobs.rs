use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::kernel::jobs::JobPayload;

/// Job to run an uploaded image through the optimization service.
///
/// The payload is opaque: whatever JSON the producer enqueued is forwarded
/// to the service unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OptimizeImage {
    pub request: Value,
}

impl OptimizeImage {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            request: serde_json::json!({ "image_url": image_url.into() }),
        }
    }

    pub fn for_article(image_url: impl Into<String>, article_id: impl Into<String>) -> Self {
        Self {
            request: serde_json::json!({
                "image_url": image_url.into(),
                "article_id": article_id.into(),
            }),
        }
    }

    /// Wrap an arbitrary request body.
    pub fn from_request(request: Value) -> Self {
        Self { request }
    }

    /// `image_url` field of the request, used for logging.
    pub fn image_url(&self) -> Option<&str> {
        self.request.get("image_url").and_then(Value::as_str)
    }
}

impl JobPayload for OptimizeImage {
    const JOB_TYPE: &'static str = "optimize-image";
}
