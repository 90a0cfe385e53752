//! No-network channel for environments without credentials.

use crate::models::{SendRequest, SendResult};
use tracing::info;

/// Logs the message and reports a synthetic success.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackSink;

impl FallbackSink {
    /// Never fails and performs no I/O.
    pub fn send(&self, request: &SendRequest) -> SendResult {
        info!(
            to = %request.to,
            subject = %request.subject,
            kind = %request.kind,
            "Email not sent (no delivery channel configured)"
        );
        SendResult::dev_mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;

    #[test]
    fn test_fallback_returns_dev_mode() {
        let request = SendRequest::new(NotificationKind::Welcome, "a@b.com", "Hi", "<p>Hi</p>");
        let result = FallbackSink.send(&request);
        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("dev-mode"));
        assert_eq!(result.preview_url, None);
        assert_eq!(result.error, None);
    }
}
