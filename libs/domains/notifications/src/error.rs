//! Error types for the notifications domain.

use thiserror::Error;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No usable credentials for the requested channel.
    #[error("Configuration incomplete: {0}")]
    ConfigurationIncomplete(String),

    /// Both the silent and the forced token acquisition failed.
    #[error("Credential acquisition failed: {0}")]
    CredentialAcquisition(String),

    /// The selected channel could not be established.
    #[error("Channel provisioning failed: {0}")]
    ChannelProvisioning(String),

    /// The active channel failed to hand off a message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Generic failure surfaced for identity-critical sends.
    ///
    /// Carries a caller-facing message only, never transport detail.
    #[error("{0}")]
    SendFailed(String),

    /// Notification payload rejected at the call boundary.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Template rendering error.
    #[error("Template rendering error: {0}")]
    Template(String),

    /// Environment configuration error.
    #[error(transparent)]
    Config(#[from] core_config::ConfigError),
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NotificationError::Transport(format!("HTTP request timed out: {}", err))
        } else {
            NotificationError::Transport(err.to_string())
        }
    }
}

impl From<lettre::transport::smtp::Error> for NotificationError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        NotificationError::Transport(format!("SMTP error: {}", err))
    }
}

impl From<lettre::error::Error> for NotificationError {
    fn from(err: lettre::error::Error) -> Self {
        NotificationError::Transport(format!("Failed to build email message: {}", err))
    }
}

impl From<lettre::address::AddressError> for NotificationError {
    fn from(err: lettre::address::AddressError) -> Self {
        NotificationError::InvalidInput(format!("Invalid email address: {}", err))
    }
}

impl From<handlebars::RenderError> for NotificationError {
    fn from(err: handlebars::RenderError) -> Self {
        NotificationError::Template(err.to_string())
    }
}

impl From<validator::ValidationErrors> for NotificationError {
    fn from(err: validator::ValidationErrors) -> Self {
        NotificationError::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::Transport(format!("JSON serialization error: {}", err))
    }
}
