// TestDependencies - mock implementations for testing
//
// Provides mock services that can be injected into ServerDeps for tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use super::{BaseImageOptimizer, BaseMailSender, MailMessage, ServerDeps};

// =============================================================================
// Mock Mail Sender
// =============================================================================

pub struct MockMailSender {
    sent: Arc<Mutex<Vec<MailMessage>>>,
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl MockMailSender {
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Fail the next `count` sends before succeeding again
    pub fn failing(self, count: usize) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every send
    pub fn always_failing(self) -> Self {
        self.failing(usize::MAX)
    }

    /// Messages that were accepted
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of send calls, including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Check if a message went to an address
    pub fn was_sent_to(&self, to: &str) -> bool {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).iter().any(|m| m.to == to)
    }
}

impl Default for MockMailSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseMailSender for MockMailSender {
    async fn send(&self, message: &MailMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            anyhow::bail!("mock mail transport rejected message to {}", message.to);
        }

        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(message.clone());
        Ok(())
    }
}

// =============================================================================
// Mock Image Optimizer
// =============================================================================

pub struct MockImageOptimizer {
    calls: Arc<Mutex<Vec<serde_json::Value>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl MockImageOptimizer {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Block every call until a permit is available on `gate`
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Requests received so far (recorded on entry)
    pub fn calls(&self) -> Vec<serde_json::Value> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockImageOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseImageOptimizer for MockImageOptimizer {
    async fn optimize(&self, request: &serde_json::Value) -> Result<serde_json::Value> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(request.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await;
            drop(permit);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "optimized": true }))
    }
}

// =============================================================================
// TestDependencies
// =============================================================================

pub struct TestDependencies {
    pub mailer: Arc<MockMailSender>,
    pub image_optimizer: Arc<MockImageOptimizer>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            mailer: Arc::new(MockMailSender::new()),
            image_optimizer: Arc::new(MockImageOptimizer::new()),
        }
    }

    /// Set a mock mail sender
    pub fn mock_mailer(mut self, mailer: MockMailSender) -> Self {
        self.mailer = Arc::new(mailer);
        self
    }

    /// Set a mock image optimizer
    pub fn mock_image_optimizer(mut self, optimizer: MockImageOptimizer) -> Self {
        self.image_optimizer = Arc::new(optimizer);
        self
    }

    /// Convert into ServerDeps for handlers; keep `self` around to inspect the mocks
    pub fn server_deps(&self) -> Arc<ServerDeps> {
        Arc::new(ServerDeps::new(
            self.mailer.clone(),
            self.image_optimizer.clone(),
        ))
    }

    /// Convert into ServerDeps when the mocks are not inspected afterwards
    pub fn into_server_deps(self) -> Arc<ServerDeps> {
        self.server_deps()
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failing_mailer_recovers_after_count() {
        let mailer = MockMailSender::new().failing(2);
        let message = MailMessage::new("a@b.com", "hi", "body");

        assert!(mailer.send(&message).await.is_err());
        assert!(mailer.send(&message).await.is_err());
        mailer.send(&message).await.unwrap();

        assert_eq!(mailer.attempts(), 3);
        assert_eq!(mailer.sent(), vec![message]);
        assert!(mailer.was_sent_to("a@b.com"));
    }

    #[tokio::test]
    async fn optimizer_tracks_concurrency() {
        let optimizer = MockImageOptimizer::new();
        optimizer.optimize(&serde_json::json!({ "id": 1 })).await.unwrap();

        assert_eq!(optimizer.calls().len(), 1);
        assert_eq!(optimizer.max_in_flight(), 1);
        assert_eq!(optimizer.in_flight(), 0);
    }
}
