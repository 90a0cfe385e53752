//! Mail API provider (`HttpApi` channel).
//!
//! Sends through the provider's `sendMail` endpoint with a bearer token from
//! the shared [`TokenCache`].

use super::{MailTransport, SentEmail};
use crate::error::{NotificationError, NotificationResult};
use crate::models::SendRequest;
use crate::token::TokenCache;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Mail API provider.
pub struct GraphProvider {
    client: Client,
    base_url: Url,
    mailbox: String,
    tokens: Arc<TokenCache>,
}

impl GraphProvider {
    pub fn new(
        base_url: &str,
        mailbox: impl Into<String>,
        tokens: Arc<TokenCache>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> NotificationResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            NotificationError::ChannelProvisioning(format!("Invalid mail API URL '{}': {}", base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(NotificationError::ChannelProvisioning(format!(
                "Mail API URL '{}' cannot carry a path",
                base_url
            )));
        }

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                NotificationError::ChannelProvisioning(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            mailbox: mailbox.into(),
            tokens,
        })
    }

    /// `{base}/users/{mailbox}/sendMail`, with the mailbox percent-encoded
    /// as a single path segment.
    fn send_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["users", self.mailbox.as_str(), "sendMail"]);
        }
        url
    }
}

// sendMail request structures

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: ItemBody<'a>,
    to_recipients: Vec<Recipient<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ItemBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Recipient<'a> {
    email_address: EmailAddress<'a>,
}

#[derive(Debug, Serialize)]
struct EmailAddress<'a> {
    address: &'a str,
}

impl<'a> SendMailRequest<'a> {
    fn from_request(request: &'a SendRequest) -> Self {
        Self {
            message: GraphMessage {
                subject: &request.subject,
                body: ItemBody {
                    content_type: "HTML",
                    content: &request.html_body,
                },
                to_recipients: vec![Recipient {
                    email_address: EmailAddress {
                        address: &request.to,
                    },
                }],
            },
            save_to_sent_items: false,
        }
    }
}

#[async_trait]
impl MailTransport for GraphProvider {
    async fn send(&self, request: &SendRequest) -> NotificationResult<SentEmail> {
        let access_token = self.tokens.acquire().await?;

        debug!(
            to = %request.to,
            subject = %request.subject,
            kind = %request.kind,
            "Sending email via mail API"
        );

        let response = self
            .client
            .post(self.send_url())
            .bearer_auth(access_token)
            .json(&SendMailRequest::from_request(request))
            .send()
            .await?;

        let status = response.status();

        if status.is_success() {
            let message_id = format!("graph-{}-{}", request.kind, Utc::now().timestamp_millis());
            info!(
                to = %request.to,
                message_id = %message_id,
                "Email sent successfully via mail API"
            );
            Ok(SentEmail {
                message_id,
                preview_url: None,
            })
        } else {
            let error_body = response.text().await.unwrap_or_default();
            error!(
                to = %request.to,
                status = %status,
                error = %error_body,
                "Mail API rejected the message"
            );
            Err(NotificationError::Transport(format!(
                "mail API error ({}): {}",
                status, error_body
            )))
        }
    }

    async fn health_check(&self) -> NotificationResult<()> {
        self.tokens.acquire().await.map(|_| ())
    }

    fn name(&self) -> &'static str {
        "graph"
    }
}
