//! Delivery channels.
//!
//! This module contains the `MailTransport` trait, the concrete transports
//! behind each channel, and the `Channel` variant the provisioner selects.

mod fallback;
mod graph;
pub mod mock;
mod smtp;

pub use fallback::FallbackSink;
pub use graph::GraphProvider;
pub use mock::MockTransport;
pub use smtp::{SmtpAuth, SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use crate::models::SendRequest;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Represents a message accepted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    /// Transport-specific message id for tracking.
    pub message_id: String,
    /// Link to a rendered preview, for transports that offer one.
    pub preview_url: Option<String>,
}

/// Trait for network transports behind a channel.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Hand one message to the transport.
    async fn send(&self, request: &SendRequest) -> NotificationResult<SentEmail>;

    /// Check that the transport is reachable.
    async fn health_check(&self) -> NotificationResult<()>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Tag of a [`Channel`], without its configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    HttpApi,
    TransportOAuth2,
    TransportPassword,
    FallbackSink,
}

impl ChannelKind {
    /// Protocol-level transports get a connectivity check after provisioning.
    pub fn is_protocol_transport(&self) -> bool {
        matches!(self, ChannelKind::TransportOAuth2 | ChannelKind::TransportPassword)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::HttpApi => write!(f, "http_api"),
            ChannelKind::TransportOAuth2 => write!(f, "transport_oauth2"),
            ChannelKind::TransportPassword => write!(f, "transport_password"),
            ChannelKind::FallbackSink => write!(f, "fallback_sink"),
        }
    }
}

/// The single active delivery mechanism.
#[derive(Clone)]
pub enum Channel {
    /// Bearer-token authenticated mail API.
    HttpApi(Arc<dyn MailTransport>),
    /// Protocol-level transport authenticated with a bearer token.
    TransportOAuth2(Arc<dyn MailTransport>),
    /// Protocol-level transport authenticated with a static password.
    TransportPassword(Arc<dyn MailTransport>),
    /// No network; logs and reports success.
    FallbackSink(FallbackSink),
}

impl Channel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::HttpApi(_) => ChannelKind::HttpApi,
            Channel::TransportOAuth2(_) => ChannelKind::TransportOAuth2,
            Channel::TransportPassword(_) => ChannelKind::TransportPassword,
            Channel::FallbackSink(_) => ChannelKind::FallbackSink,
        }
    }

    /// The network transport, or `None` for the fallback sink.
    pub fn transport(&self) -> Option<&Arc<dyn MailTransport>> {
        match self {
            Channel::HttpApi(t) | Channel::TransportOAuth2(t) | Channel::TransportPassword(t) => {
                Some(t)
            }
            Channel::FallbackSink(_) => None,
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transport() {
            Some(t) => write!(f, "Channel::{:?}({})", self.kind(), t.name()),
            None => write!(f, "Channel::FallbackSink"),
        }
    }
}
