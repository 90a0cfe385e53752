//! Data models for the notifications domain.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Sentinel message id returned when no real channel is active.
pub const DEV_MODE_MESSAGE_ID: &str = "dev-mode";

// ============================================================================
// Send request / result
// ============================================================================

/// How a failed send is reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criticality {
    /// Failure is raised to the caller (signup steps).
    IdentityCritical,
    /// Failure is folded into the returned [`SendResult`].
    BestEffort,
}

/// Types of notifications that can be sent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    VerificationCode,
    Welcome,
    Generic,
    PaymentFailed,
    PaymentActionRequired,
    TrialEnded,
    SubscriptionCanceled,
    SubscriptionPaused,
    SubscriptionResumed,
    SubscriptionUpgraded,
    SubscriptionCancellationScheduled,
}

impl NotificationKind {
    pub fn criticality(&self) -> Criticality {
        match self {
            NotificationKind::VerificationCode | NotificationKind::Welcome => {
                Criticality::IdentityCritical
            }
            _ => Criticality::BestEffort,
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NotificationKind::VerificationCode => "verification_code",
            NotificationKind::Welcome => "welcome",
            NotificationKind::Generic => "generic",
            NotificationKind::PaymentFailed => "payment_failed",
            NotificationKind::PaymentActionRequired => "payment_action_required",
            NotificationKind::TrialEnded => "trial_ended",
            NotificationKind::SubscriptionCanceled => "subscription_canceled",
            NotificationKind::SubscriptionPaused => "subscription_paused",
            NotificationKind::SubscriptionResumed => "subscription_resumed",
            NotificationKind::SubscriptionUpgraded => "subscription_upgraded",
            NotificationKind::SubscriptionCancellationScheduled => {
                "subscription_cancellation_scheduled"
            }
        };
        f.write_str(name)
    }
}

/// A message ready to be handed to the active channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub kind: NotificationKind,
    /// Recipient email address.
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: Option<String>,
}

impl SendRequest {
    pub fn new(
        kind: NotificationKind,
        to: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            to: to.into(),
            subject: subject.into(),
            html_body: html_body.into(),
            text_body: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text_body = Some(text.into());
        self
    }

    pub fn criticality(&self) -> Criticality {
        self.kind.criticality()
    }
}

/// Outcome of a send as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    pub success: bool,
    pub message_id: Option<String>,
    pub preview_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn delivered(message_id: impl Into<String>) -> Self {
        Self {
            success: true,
            message_id: Some(message_id.into()),
            preview_url: None,
            error: None,
        }
    }

    pub fn dev_mode() -> Self {
        Self::delivered(DEV_MODE_MESSAGE_ID)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            preview_url: None,
            error: Some(error.into()),
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.message_id.as_deref() == Some(DEV_MODE_MESSAGE_ID)
    }
}

// ============================================================================
// Billing payloads
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PaymentFailedData {
    pub customer_name: Option<String>,
    /// Formatted amount, e.g. `$9.99`.
    #[validate(length(min = 1, message = "amount is required"))]
    pub amount: String,
    #[validate(url)]
    pub invoice_url: Option<String>,
    /// Human-readable date of the next collection attempt.
    pub next_retry_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct PaymentActionRequiredData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "amount is required"))]
    pub amount: String,
    /// Link where the customer completes authentication.
    #[validate(url)]
    pub action_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct TrialEndedData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "plan name is required"))]
    pub plan_name: String,
    #[validate(url)]
    pub billing_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubscriptionCanceledData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "plan name is required"))]
    pub plan_name: String,
    /// Last day of paid access.
    pub access_until: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubscriptionPausedData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "plan name is required"))]
    pub plan_name: String,
    pub resumes_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubscriptionResumedData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "plan name is required"))]
    pub plan_name: String,
    pub next_billing_date: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubscriptionUpgradedData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "previous plan is required"))]
    pub previous_plan: String,
    #[validate(length(min = 1, message = "new plan is required"))]
    pub new_plan: String,
    /// Formatted recurring price of the new plan.
    pub new_amount: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct SubscriptionCancellationScheduledData {
    pub customer_name: Option<String>,
    #[validate(length(min = 1, message = "plan name is required"))]
    pub plan_name: String,
    #[validate(length(min = 1, message = "cancellation date is required"))]
    pub cancel_at: String,
    #[validate(url)]
    pub reactivate_url: Option<String>,
}
