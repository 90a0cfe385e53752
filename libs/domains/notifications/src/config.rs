//! Credential and delivery configuration loaded from the environment.

use core_config::{ConfigError, FromEnv, env_optional, env_or_default, env_parse_or};
use std::fmt;
use std::time::Duration;

/// Provider credentials as supplied by the deployment.
///
/// Every field is optional: local and offline environments carry none of
/// them. The set is never mutated after loading.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    /// Application (client) id registered with the identity provider.
    pub client_id: Option<String>,
    /// Client secret for the client-credentials grant.
    pub client_secret: Option<String>,
    /// Tenant / directory id.
    pub tenant_id: Option<String>,
    /// Mailbox address messages are sent from.
    pub mailbox: Option<String>,
    /// Static mailbox password. When set, protocol-level delivery uses it
    /// instead of a bearer token.
    pub password: Option<String>,
}

impl CredentialSet {
    /// Client id, client secret and tenant id are all present.
    pub fn has_api_credentials(&self) -> bool {
        self.has_client_credentials() && self.tenant_id.is_some()
    }

    /// Client id and client secret are both present.
    pub fn has_client_credentials(&self) -> bool {
        self.client_id.is_some() && self.client_secret.is_some()
    }

    pub fn has_mailbox(&self) -> bool {
        self.mailbox.is_some()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }
}

impl FromEnv for CredentialSet {
    /// Reads `MAIL_CLIENT_ID`, `MAIL_CLIENT_SECRET`, `MAIL_TENANT_ID`,
    /// `MAIL_MAILBOX` and `MAIL_PASSWORD`. Missing keys are not an error.
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: env_optional("MAIL_CLIENT_ID"),
            client_secret: env_optional("MAIL_CLIENT_SECRET"),
            tenant_id: env_optional("MAIL_TENANT_ID"),
            mailbox: env_optional("MAIL_MAILBOX"),
            password: env_optional("MAIL_PASSWORD"),
        })
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("tenant_id", &self.tenant_id)
            .field("mailbox", &self.mailbox)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Endpoints, sender identity and timeouts for the delivery channels.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Identity provider authority; the token endpoint is
    /// `{authority_url}/{tenant_id}/oauth2/v2.0/token`.
    pub authority_url: String,
    /// Mail API base URL.
    pub graph_url: String,
    /// Scope requested for the HTTP API channel.
    pub graph_scope: String,
    /// SMTP submission host.
    pub smtp_host: String,
    /// SMTP submission port (STARTTLS).
    pub smtp_port: u16,
    /// Scope requested for XOAUTH2 SMTP authentication.
    pub smtp_scope: String,
    /// Sender used when no mailbox address is configured.
    pub from_address: String,
    /// Display name for the sender.
    pub from_name: String,
    /// Connect / handshake bound for network operations.
    pub connect_timeout: Duration,
    /// Per-request bound for network operations.
    pub request_timeout: Duration,
    /// Overall deadline the dispatcher applies to a single send.
    pub send_deadline: Duration,
}

impl DeliveryConfig {
    /// Address messages are sent from: the mailbox when configured,
    /// otherwise the fallback `from_address`.
    pub fn sender_address<'a>(&'a self, credentials: &'a CredentialSet) -> &'a str {
        credentials.mailbox.as_deref().unwrap_or(&self.from_address)
    }

    /// Token endpoint for the given tenant.
    pub fn token_url(&self, tenant_id: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_url.trim_end_matches('/'),
            tenant_id
        )
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            authority_url: "https://login.microsoftonline.com".to_string(),
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
            graph_scope: "https://graph.microsoft.com/.default".to_string(),
            smtp_host: "smtp.office365.com".to_string(),
            smtp_port: 587,
            smtp_scope: "https://outlook.office365.com/.default".to_string(),
            from_address: "noreply@localhost".to_string(),
            from_name: "Notifications".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            send_deadline: Duration::from_secs(30),
        }
    }
}

impl FromEnv for DeliveryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout = Duration::from_secs(env_parse_or("MAIL_TIMEOUT_SECS", 10u64)?);

        Ok(Self {
            authority_url: env_or_default("MAIL_AUTHORITY_URL", &defaults.authority_url),
            graph_url: env_or_default("MAIL_GRAPH_URL", &defaults.graph_url),
            graph_scope: defaults.graph_scope,
            smtp_host: env_or_default("MAIL_SMTP_HOST", &defaults.smtp_host),
            smtp_port: env_parse_or("MAIL_SMTP_PORT", defaults.smtp_port)?,
            smtp_scope: defaults.smtp_scope,
            from_address: env_optional("EMAIL_FROM_ADDRESS").unwrap_or(defaults.from_address),
            from_name: env_optional("EMAIL_FROM_NAME").unwrap_or(defaults.from_name),
            connect_timeout: timeout,
            request_timeout: timeout,
            send_deadline: Duration::from_secs(env_parse_or("MAIL_SEND_DEADLINE_SECS", 30u64)?),
        })
    }
}

/// Presentation inputs for rendered notifications.
#[derive(Debug, Clone)]
pub struct NotificationServiceConfig {
    /// Product name shown in subjects and footers.
    pub app_name: String,
    /// Base URL for links back into the application.
    pub frontend_url: String,
    /// Support contact shown in footers.
    pub support_email: Option<String>,
    /// Lifetime of a verification code, shown to the recipient.
    pub verification_code_ttl_minutes: u32,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            app_name: "Courier".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            support_email: None,
            verification_code_ttl_minutes: 10,
        }
    }
}

impl FromEnv for NotificationServiceConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            app_name: env_or_default("APP_NAME", &defaults.app_name),
            frontend_url: env_or_default("FRONTEND_URL", &defaults.frontend_url),
            support_email: env_optional("SUPPORT_EMAIL"),
            verification_code_ttl_minutes: env_parse_or(
                "VERIFICATION_CODE_TTL_MINUTES",
                defaults.verification_code_ttl_minutes,
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAIL_KEYS: [&str; 5] = [
        "MAIL_CLIENT_ID",
        "MAIL_CLIENT_SECRET",
        "MAIL_TENANT_ID",
        "MAIL_MAILBOX",
        "MAIL_PASSWORD",
    ];

    #[test]
    fn test_credentials_from_empty_env() {
        temp_env::with_vars_unset(MAIL_KEYS, || {
            let creds = CredentialSet::from_env().unwrap();
            assert_eq!(creds, CredentialSet::default());
            assert!(!creds.has_api_credentials());
            assert!(!creds.has_mailbox());
        });
    }

    #[test]
    fn test_blank_credentials_are_absent() {
        temp_env::with_vars(
            [
                ("MAIL_CLIENT_ID", Some("client")),
                ("MAIL_CLIENT_SECRET", Some("")),
                ("MAIL_TENANT_ID", Some("tenant")),
                ("MAIL_MAILBOX", Some("  ")),
                ("MAIL_PASSWORD", None),
            ],
            || {
                let creds = CredentialSet::from_env().unwrap();
                assert_eq!(creds.client_id.as_deref(), Some("client"));
                assert_eq!(creds.client_secret, None);
                assert!(!creds.has_client_credentials());
                assert!(!creds.has_api_credentials());
                assert!(!creds.has_mailbox());
            },
        );
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = CredentialSet {
            client_secret: Some("super-secret".to_string()),
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_sender_address_prefers_mailbox() {
        let config = DeliveryConfig::default();
        let mut creds = CredentialSet::default();
        assert_eq!(config.sender_address(&creds), "noreply@localhost");

        creds.mailbox = Some("billing@example.com".to_string());
        assert_eq!(config.sender_address(&creds), "billing@example.com");
    }

    #[test]
    fn test_token_url() {
        let config = DeliveryConfig {
            authority_url: "http://127.0.0.1:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.token_url("tenant-1"),
            "http://127.0.0.1:9000/tenant-1/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_delivery_config_defaults_from_env() {
        temp_env::with_vars_unset(
            [
                "MAIL_SMTP_PORT",
                "MAIL_TIMEOUT_SECS",
                "MAIL_SEND_DEADLINE_SECS",
                "EMAIL_FROM_ADDRESS",
                "MAIL_SMTP_HOST",
            ],
            || {
                let config = DeliveryConfig::from_env().unwrap();
                assert_eq!(config.smtp_port, 587);
                assert_eq!(config.smtp_host, "smtp.office365.com");
                assert_eq!(config.request_timeout, Duration::from_secs(10));
                assert_eq!(config.send_deadline, Duration::from_secs(30));
                assert_eq!(config.from_address, "noreply@localhost");
            },
        );
    }

    #[test]
    fn test_delivery_config_rejects_bad_port() {
        temp_env::with_var("MAIL_SMTP_PORT", Some("smtp"), || {
            assert!(DeliveryConfig::from_env().is_err());
        });
    }
}
