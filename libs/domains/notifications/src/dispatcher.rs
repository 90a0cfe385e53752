//! Uniform send entry point over the active channel.

use crate::error::{NotificationError, NotificationResult};
use crate::models::{Criticality, SendRequest, SendResult};
use crate::provisioner::ChannelProvisioner;
use crate::providers::Channel;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Routes requests to the provisioned channel and applies the error policy.
///
/// `send` is fail-open: failures come back as `SendResult { success: false }`.
/// `send_critical` is fail-closed: failures are returned as `Err`.
#[derive(Clone)]
pub struct Dispatcher {
    provisioner: Arc<ChannelProvisioner>,
    send_deadline: Duration,
}

impl Dispatcher {
    pub fn new(provisioner: Arc<ChannelProvisioner>, send_deadline: Duration) -> Self {
        Self {
            provisioner,
            send_deadline,
        }
    }

    pub fn provisioner(&self) -> &Arc<ChannelProvisioner> {
        &self.provisioner
    }

    /// Best-effort send. Never returns an error.
    pub async fn send(&self, request: &SendRequest) -> SendResult {
        debug_assert_eq!(
            request.criticality(),
            Criticality::BestEffort,
            "{} must go through send_critical",
            request.kind
        );

        match self.route(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    to = %request.to,
                    kind = %request.kind,
                    error = %e,
                    "Best-effort email failed"
                );
                SendResult::failed(e.to_string())
            }
        }
    }

    /// Identity-critical send. Transport failures are returned to the caller.
    pub async fn send_critical(&self, request: &SendRequest) -> NotificationResult<SendResult> {
        debug_assert_eq!(
            request.criticality(),
            Criticality::IdentityCritical,
            "{} must go through send",
            request.kind
        );

        self.route(request).await.inspect_err(|e| {
            error!(
                to = %request.to,
                kind = %request.kind,
                error = %e,
                "Identity-critical email failed"
            );
        })
    }

    async fn route(&self, request: &SendRequest) -> NotificationResult<SendResult> {
        let channel = self.provisioner.ensure_initialized().await;

        let transport = match channel {
            Channel::FallbackSink(sink) => return Ok(sink.send(request)),
            Channel::HttpApi(t) | Channel::TransportOAuth2(t) | Channel::TransportPassword(t) => t,
        };

        let sent = tokio::time::timeout(self.send_deadline, transport.send(request))
            .await
            .map_err(|_| {
                NotificationError::Transport(format!(
                    "{} send timed out after {}s",
                    transport.name(),
                    self.send_deadline.as_secs()
                ))
            })??;

        Ok(SendResult {
            success: true,
            message_id: Some(sent.message_id),
            preview_url: sent.preview_url,
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialSet;
    use crate::models::NotificationKind;
    use crate::provisioner::MockChannelConnector;
    use crate::providers::{MailTransport, MockTransport, SentEmail};
    use async_trait::async_trait;

    fn password_creds() -> CredentialSet {
        CredentialSet {
            mailbox: Some("noreply@example.com".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        }
    }

    fn dispatcher_with(channel: Channel) -> Dispatcher {
        let mut connector = MockChannelConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move |_, _| Ok(channel.clone()));
        let provisioner = Arc::new(ChannelProvisioner::new(password_creds(), Arc::new(connector)));
        Dispatcher::new(provisioner, Duration::from_secs(5))
    }

    fn request(kind: NotificationKind) -> SendRequest {
        SendRequest::new(kind, "a@b.com", "Subject", "<p>Body</p>")
    }

    #[tokio::test]
    async fn test_send_maps_success() {
        let transport = MockTransport::new();
        let dispatcher = dispatcher_with(Channel::TransportPassword(Arc::new(transport.clone())));

        let result = dispatcher.send(&request(NotificationKind::TrialEnded)).await;
        assert!(result.success);
        assert_eq!(result.message_id.as_deref(), Some("mock-trial_ended-0"));
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test]
    async fn test_send_is_fail_open() {
        let transport = MockTransport::failing("554 relay denied");
        let dispatcher = dispatcher_with(Channel::TransportPassword(Arc::new(transport)));

        let result = dispatcher.send(&request(NotificationKind::PaymentFailed)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("554 relay denied"));
    }

    #[tokio::test]
    async fn test_send_critical_is_fail_closed() {
        let transport = MockTransport::failing("554 relay denied");
        let dispatcher = dispatcher_with(Channel::TransportPassword(Arc::new(transport)));

        let err = dispatcher
            .send_critical(&request(NotificationKind::VerificationCode))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Transport(_)));
    }

    struct StalledTransport;

    #[async_trait]
    impl MailTransport for StalledTransport {
        async fn send(&self, _request: &SendRequest) -> NotificationResult<SentEmail> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("send deadline should fire first")
        }

        async fn health_check(&self) -> NotificationResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_deadline_is_enforced() {
        let dispatcher = dispatcher_with(Channel::HttpApi(Arc::new(StalledTransport)));

        let result = dispatcher.send(&request(NotificationKind::SubscriptionPaused)).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("timed out"));
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "verification_code must go through send_critical")]
    async fn test_identity_critical_kind_rejected_by_best_effort_send() {
        let dispatcher = dispatcher_with(Channel::TransportPassword(Arc::new(MockTransport::new())));
        dispatcher.send(&request(NotificationKind::VerificationCode)).await;
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "payment_failed must go through send")]
    async fn test_best_effort_kind_rejected_by_critical_send() {
        let dispatcher = dispatcher_with(Channel::TransportPassword(Arc::new(MockTransport::new())));
        let _ = dispatcher.send_critical(&request(NotificationKind::PaymentFailed)).await;
    }
}
