//! Mock transport for testing

use super::{MailTransport, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::SendRequest;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Mock transport that captures sent messages
#[derive(Clone)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SendRequest>>>,
    attempts: Arc<AtomicUsize>,
    health_checks: Arc<AtomicUsize>,
    failure_message: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            health_checks: Arc::new(AtomicUsize::new(0)),
            failure_message: None,
        }
    }

    /// Create a mock transport whose sends and health checks always fail
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Self::new()
        }
    }

    /// Messages accepted so far
    pub async fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().await.clone()
    }

    /// Number of `send` calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn health_checks(&self) -> usize {
        self.health_checks.load(Ordering::SeqCst)
    }

    /// Check if a message was sent to a specific address
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent.lock().await.iter().any(|r| r.to == email)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send(&self, request: &SendRequest) -> NotificationResult<SentEmail> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(message) = &self.failure_message {
            return Err(NotificationError::Transport(message.clone()));
        }

        self.sent.lock().await.push(request.clone());

        Ok(SentEmail {
            message_id: format!("mock-{}-{}", request.kind, n),
            preview_url: None,
        })
    }

    async fn health_check(&self) -> NotificationResult<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        match &self.failure_message {
            Some(message) => Err(NotificationError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;

    #[tokio::test]
    async fn test_mock_transport_records_sends() {
        let transport = MockTransport::new();
        let request = SendRequest::new(NotificationKind::Generic, "user@example.com", "Test", "Body");

        let sent = transport.send(&request).await.unwrap();
        assert_eq!(sent.message_id, "mock-generic-0");
        assert!(transport.was_sent_to("user@example.com").await);
        assert!(!transport.was_sent_to("other@example.com").await);
    }

    #[tokio::test]
    async fn test_mock_transport_fails() {
        let transport = MockTransport::failing("Simulated failure");
        let request = SendRequest::new(NotificationKind::Generic, "user@example.com", "Test", "Body");

        let err = transport.send(&request).await.unwrap_err();
        assert!(err.to_string().contains("Simulated failure"));
        assert_eq!(transport.attempts(), 1);
        assert!(transport.sent().await.is_empty());
    }
}
