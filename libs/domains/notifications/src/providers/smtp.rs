//! SMTP provider implementation using lettre.
//!
//! Backs both protocol-level channels: `TransportOAuth2` authenticates with
//! XOAUTH2 using a bearer token, `TransportPassword` with the mailbox
//! password. Both require STARTTLS with TLS 1.2 or newer.

use super::{MailTransport, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::SendRequest;
use crate::token::TokenCache;
use async_trait::async_trait;
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::{Credentials, Mechanism},
        client::{Tls, TlsParameters, TlsVersion},
    },
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Mailbox used as SMTP username and sender address.
    pub mailbox: String,
    /// Sender display name.
    pub from_name: String,
    /// Bound on connect, handshake and each SMTP command.
    pub timeout: Duration,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, port: u16, mailbox: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            mailbox: mailbox.into(),
            from_name: "Notifications".to_string(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_from_name(mut self, from_name: impl Into<String>) -> Self {
        self.from_name = from_name.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// How the SMTP session authenticates.
#[derive(Clone)]
pub enum SmtpAuth {
    /// XOAUTH2 with a token from the cache, fetched per send.
    OAuth2(Arc<TokenCache>),
    /// PLAIN / LOGIN with a static password.
    Password(String),
}

/// SMTP email provider.
pub struct SmtpProvider {
    config: Arc<SmtpConfig>,
    session: Session,
}

enum Session {
    /// Built once; the password never changes.
    Password(AsyncSmtpTransport<Tokio1Executor>),
    /// Rebuilt per send with a current token.
    OAuth2(Arc<TokenCache>),
}

impl SmtpProvider {
    /// Create a new SMTP provider. No network I/O happens here.
    pub fn new(config: SmtpConfig, auth: SmtpAuth) -> NotificationResult<Self> {
        let session = match auth {
            SmtpAuth::Password(password) => Session::Password(Self::build_transport(
                &config,
                Credentials::new(config.mailbox.clone(), password),
                vec![Mechanism::Plain, Mechanism::Login],
            )?),
            SmtpAuth::OAuth2(tokens) => Session::OAuth2(tokens),
        };

        Ok(Self {
            config: Arc::new(config),
            session,
        })
    }

    pub fn uses_oauth2(&self) -> bool {
        matches!(self.session, Session::OAuth2(_))
    }

    fn build_transport(
        config: &SmtpConfig,
        credentials: Credentials,
        mechanisms: Vec<Mechanism>,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let tls = TlsParameters::builder(config.host.clone())
            .set_min_tls_version(TlsVersion::Tlsv12)
            .build()
            .map_err(|e| {
                NotificationError::ChannelProvisioning(format!("SMTP TLS params error: {}", e))
            })?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(Tls::Required(tls))
            .timeout(Some(config.timeout))
            .credentials(credentials)
            .authentication(mechanisms)
            .build();

        Ok(transport)
    }

    async fn oauth2_transport(
        &self,
        tokens: &TokenCache,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let token = tokens.acquire().await?;
        Self::build_transport(
            &self.config,
            Credentials::new(self.config.mailbox.clone(), token),
            vec![Mechanism::Xoauth2],
        )
    }

    /// Build a lettre Message from a send request.
    fn build_message(&self, request: &SendRequest) -> NotificationResult<Message> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.mailbox).parse()?;
        let to: Mailbox = request.to.parse()?;

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(&request.subject);

        let html = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(request.html_body.clone());

        let message = match &request.text_body {
            Some(text) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.clone()),
                    )
                    .singlepart(html),
            )?,
            None => builder.singlepart(html)?,
        };

        Ok(message)
    }
}

#[async_trait]
impl MailTransport for SmtpProvider {
    async fn send(&self, request: &SendRequest) -> NotificationResult<SentEmail> {
        debug!(
            to = %request.to,
            subject = %request.subject,
            host = %self.config.host,
            port = %self.config.port,
            oauth2 = self.uses_oauth2(),
            "Sending email via SMTP"
        );

        let message = self.build_message(request)?;

        let sent = match &self.session {
            Session::Password(transport) => transport.send(message).await,
            Session::OAuth2(tokens) => self.oauth2_transport(tokens).await?.send(message).await,
        };

        let response = sent.map_err(|e| {
            error!(
                to = %request.to,
                error = %e,
                "Failed to send email via SMTP"
            );
            NotificationError::Transport(format!("SMTP send failed: {}", e))
        })?;

        let message_id = response
            .message()
            .next()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("smtp-{}-{}", request.kind, Utc::now().timestamp_millis()));

        info!(
            to = %request.to,
            message_id = %message_id,
            "Email sent successfully via SMTP"
        );

        Ok(SentEmail {
            message_id,
            preview_url: None,
        })
    }

    async fn health_check(&self) -> NotificationResult<()> {
        let reachable = match &self.session {
            Session::Password(transport) => transport.test_connection().await?,
            Session::OAuth2(tokens) => self.oauth2_transport(tokens).await?.test_connection().await?,
        };
        if reachable {
            Ok(())
        } else {
            Err(NotificationError::Transport(format!(
                "SMTP server {}:{} did not accept the connection",
                self.config.host, self.config.port
            )))
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotificationKind;

    fn password_provider() -> SmtpProvider {
        let config = SmtpConfig::new("smtp.example.com", 587, "billing@example.com")
            .with_from_name("Billing");
        SmtpProvider::new(config, SmtpAuth::Password("secret".to_string())).unwrap()
    }

    #[test]
    fn test_smtp_config_new() {
        let config = SmtpConfig::new("mail.example.com", 587, "a@example.com");
        assert_eq!(config.host, "mail.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.timeout, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_password_provider_builds_without_network() {
        let provider = password_provider();
        assert!(!provider.uses_oauth2());
        assert_eq!(provider.name(), "smtp");
    }

    #[tokio::test]
    async fn test_multipart_when_text_present() {
        let provider = password_provider();
        let request = SendRequest::new(
            NotificationKind::PaymentFailed,
            "a@b.com",
            "Payment failed",
            "<p>Payment failed</p>",
        )
        .with_text("Payment failed");

        let formatted = String::from_utf8(provider.build_message(&request).unwrap().formatted())
            .unwrap();
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("billing@example.com"));
    }

    #[tokio::test]
    async fn test_invalid_recipient_is_rejected() {
        let provider = password_provider();
        let request = SendRequest::new(NotificationKind::Generic, "not an address", "s", "b");
        let err = provider.build_message(&request).unwrap_err();
        assert!(matches!(err, NotificationError::InvalidInput(_)));
    }
}
