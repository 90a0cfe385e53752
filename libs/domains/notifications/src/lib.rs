//! Notifications Domain
//!
//! Delivers transactional email (verification codes, welcome messages and
//! billing-lifecycle events) over whichever channel the deployment's
//! credentials allow.
//!
//! # Channels
//!
//! Exactly one channel is provisioned per process, chosen from a priority
//! ladder:
//!
//! ```text
//! client id + secret + tenant   ──► HttpApi            (Graph sendMail, bearer token)
//! mailbox + client creds        ──► TransportOAuth2    (SMTP XOAUTH2)
//! mailbox + password            ──► TransportPassword  (SMTP PLAIN/LOGIN)
//! nothing usable / failure      ──► FallbackSink       (log only, "dev-mode")
//! ```
//!
//! # Error policy
//!
//! - Verification and welcome emails are identity-critical: failures are
//!   returned as `Err(NotificationError::SendFailed(..))`.
//! - Every other send is best-effort and reports failure through
//!   `SendResult { success: false, .. }`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{NotificationService, PaymentFailedData};
//!
//! let service = Arc::new(NotificationService::from_env()?);
//! service.spawn_initialization();
//!
//! service.send_verification_code("a@b.com", "123456").await?;
//!
//! let result = service
//!     .send_payment_failed("a@b.com", &PaymentFailedData { amount: "$9.99".into(), ..Default::default() })
//!     .await;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod providers;
pub mod provisioner;
pub mod service;
pub mod templates;
pub mod token;

// Re-export commonly used types
pub use config::{CredentialSet, DeliveryConfig, NotificationServiceConfig};
pub use dispatcher::Dispatcher;
pub use error::{NotificationError, NotificationResult};
pub use models::{
    Criticality, NotificationKind, PaymentActionRequiredData, PaymentFailedData, SendRequest,
    SendResult, SubscriptionCancellationScheduledData, SubscriptionCanceledData,
    SubscriptionPausedData, SubscriptionResumedData, SubscriptionUpgradedData, TrialEndedData,
    DEV_MODE_MESSAGE_ID,
};
pub use providers::{Channel, ChannelKind, FallbackSink, MailTransport, MockTransport, SentEmail};
pub use provisioner::{
    ChannelConnector, ChannelProvisioner, InitializationState, LiveConnector, select_rung,
};
pub use service::NotificationService;
pub use templates::{RenderedEmail, TemplateEngine};
pub use token::{OAuthTokenSource, TokenCache, TokenSource, TokenState};
