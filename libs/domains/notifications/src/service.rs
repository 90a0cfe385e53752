//! Public notification operations.
//!
//! Identity-critical sends (verification code, welcome) are fail-closed and
//! surface a generic [`NotificationError::SendFailed`]. Everything else is
//! fail-open and reports failure through [`SendResult`].

use crate::config::{CredentialSet, DeliveryConfig, NotificationServiceConfig};
use crate::dispatcher::Dispatcher;
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    NotificationKind, PaymentActionRequiredData, PaymentFailedData, SendRequest, SendResult,
    SubscriptionCancellationScheduledData, SubscriptionCanceledData, SubscriptionPausedData,
    SubscriptionResumedData, SubscriptionUpgradedData, TrialEndedData,
};
use crate::provisioner::{ChannelConnector, ChannelProvisioner, InitializationState, LiveConnector};
use crate::providers::ChannelKind;
use crate::templates::{RenderedEmail, TemplateEngine};
use core_config::FromEnv;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use validator::Validate;

const VERIFICATION_FAILED: &str = "failed to send verification email";
const WELCOME_FAILED: &str = "failed to send welcome email";

/// Service for sending transactional notifications.
///
/// Owns its channel, token cache and initialization state. Construct one per
/// process and share it behind an `Arc`.
pub struct NotificationService {
    dispatcher: Dispatcher,
    templates: TemplateEngine,
}

impl NotificationService {
    /// Create a service that provisions the real delivery channels.
    pub fn new(
        credentials: CredentialSet,
        delivery: DeliveryConfig,
        config: NotificationServiceConfig,
    ) -> NotificationResult<Self> {
        let send_deadline = delivery.send_deadline;
        Self::with_connector(
            credentials,
            Arc::new(LiveConnector::new(delivery)),
            send_deadline,
            config,
        )
    }

    /// Create a service with a custom channel connector.
    pub fn with_connector(
        credentials: CredentialSet,
        connector: Arc<dyn ChannelConnector>,
        send_deadline: Duration,
        config: NotificationServiceConfig,
    ) -> NotificationResult<Self> {
        let provisioner = Arc::new(ChannelProvisioner::new(credentials, connector));
        Ok(Self {
            dispatcher: Dispatcher::new(provisioner, send_deadline),
            templates: TemplateEngine::new(config)?,
        })
    }

    /// Create a service from `MAIL_*`, `EMAIL_*` and presentation env vars.
    pub fn from_env() -> NotificationResult<Self> {
        Self::new(
            CredentialSet::from_env()?,
            DeliveryConfig::from_env()?,
            NotificationServiceConfig::from_env()?,
        )
    }

    pub fn config(&self) -> &NotificationServiceConfig {
        self.templates.config()
    }

    /// Start channel provisioning in the background.
    ///
    /// Sends issued before it completes wait on the same in-flight run.
    pub fn spawn_initialization(&self) -> JoinHandle<()> {
        self.dispatcher.provisioner().spawn_initialization()
    }

    /// Provision the channel if needed and report which one is active.
    pub async fn ensure_initialized(&self) -> ChannelKind {
        self.dispatcher.provisioner().ensure_initialized().await.kind()
    }

    pub fn initialization_state(&self) -> InitializationState {
        self.dispatcher.provisioner().state()
    }

    pub fn provisioner(&self) -> &Arc<ChannelProvisioner> {
        self.dispatcher.provisioner()
    }

    // ========================================================================
    // Identity-critical
    // ========================================================================

    /// Send a signup verification code.
    pub async fn send_verification_code(
        &self,
        to: &str,
        code: &str,
    ) -> NotificationResult<SendResult> {
        info!(to = %to, "Sending verification code");

        let rendered = self
            .templates
            .render_verification_code(code)
            .map_err(|e| generic_failure(e, VERIFICATION_FAILED))?;

        self.dispatcher
            .send_critical(&request(NotificationKind::VerificationCode, to, rendered))
            .await
            .map_err(|e| generic_failure(e, VERIFICATION_FAILED))
    }

    /// Send the post-signup welcome message.
    pub async fn send_welcome_email(
        &self,
        to: &str,
        display_name: &str,
    ) -> NotificationResult<SendResult> {
        info!(to = %to, "Sending welcome email");

        let rendered = self
            .templates
            .render_welcome(display_name)
            .map_err(|e| generic_failure(e, WELCOME_FAILED))?;

        self.dispatcher
            .send_critical(&request(NotificationKind::Welcome, to, rendered))
            .await
            .map_err(|e| generic_failure(e, WELCOME_FAILED))
    }

    // ========================================================================
    // Best-effort
    // ========================================================================

    /// Send a pre-rendered message. Never fails; check `success`.
    pub async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        text_body: Option<&str>,
    ) -> SendResult {
        let mut request = SendRequest::new(NotificationKind::Generic, to, subject, html_body);
        request.text_body = text_body.map(str::to_string);
        self.dispatcher.send(&request).await
    }

    pub async fn send_payment_failed(&self, to: &str, data: &PaymentFailedData) -> SendResult {
        self.send_billing(NotificationKind::PaymentFailed, to, data, |t, d| {
            t.render_payment_failed(d)
        })
        .await
    }

    pub async fn send_payment_action_required(
        &self,
        to: &str,
        data: &PaymentActionRequiredData,
    ) -> SendResult {
        self.send_billing(NotificationKind::PaymentActionRequired, to, data, |t, d| {
            t.render_payment_action_required(d)
        })
        .await
    }

    pub async fn send_trial_ended(&self, to: &str, data: &TrialEndedData) -> SendResult {
        self.send_billing(NotificationKind::TrialEnded, to, data, |t, d| {
            t.render_trial_ended(d)
        })
        .await
    }

    pub async fn send_subscription_canceled(
        &self,
        to: &str,
        data: &SubscriptionCanceledData,
    ) -> SendResult {
        self.send_billing(NotificationKind::SubscriptionCanceled, to, data, |t, d| {
            t.render_subscription_canceled(d)
        })
        .await
    }

    pub async fn send_subscription_paused(
        &self,
        to: &str,
        data: &SubscriptionPausedData,
    ) -> SendResult {
        self.send_billing(NotificationKind::SubscriptionPaused, to, data, |t, d| {
            t.render_subscription_paused(d)
        })
        .await
    }

    pub async fn send_subscription_resumed(
        &self,
        to: &str,
        data: &SubscriptionResumedData,
    ) -> SendResult {
        self.send_billing(NotificationKind::SubscriptionResumed, to, data, |t, d| {
            t.render_subscription_resumed(d)
        })
        .await
    }

    pub async fn send_subscription_upgraded(
        &self,
        to: &str,
        data: &SubscriptionUpgradedData,
    ) -> SendResult {
        self.send_billing(NotificationKind::SubscriptionUpgraded, to, data, |t, d| {
            t.render_subscription_upgraded(d)
        })
        .await
    }

    pub async fn send_subscription_cancellation_scheduled(
        &self,
        to: &str,
        data: &SubscriptionCancellationScheduledData,
    ) -> SendResult {
        self.send_billing(
            NotificationKind::SubscriptionCancellationScheduled,
            to,
            data,
            |t, d| t.render_subscription_cancellation_scheduled(d),
        )
        .await
    }

    /// Validate, render and hand off a billing notification.
    ///
    /// Invalid payloads are rejected before the channel is touched.
    async fn send_billing<T, F>(
        &self,
        kind: NotificationKind,
        to: &str,
        data: &T,
        render: F,
    ) -> SendResult
    where
        T: Validate,
        F: FnOnce(&TemplateEngine, &T) -> NotificationResult<RenderedEmail>,
    {
        let rendered = data
            .validate()
            .map_err(NotificationError::from)
            .and_then(|()| render(&self.templates, data));

        match rendered {
            Ok(rendered) => self.dispatcher.send(&request(kind, to, rendered)).await,
            Err(e) => {
                warn!(to = %to, kind = %kind, error = %e, "Billing email not sent");
                SendResult::failed(e.to_string())
            }
        }
    }
}

fn request(kind: NotificationKind, to: &str, rendered: RenderedEmail) -> SendRequest {
    SendRequest::new(kind, to, rendered.subject, rendered.html).with_text(rendered.text)
}

fn generic_failure(cause: NotificationError, message: &str) -> NotificationError {
    error!(error = %cause, "{}", message);
    NotificationError::SendFailed(message.to_string())
}
