//! Channel provisioning.
//!
//! Credentials are inspected once and exactly one channel is chosen from a
//! priority ladder:
//!
//! 1. client id + client secret + tenant id → `HttpApi`
//! 2. mailbox → `TransportOAuth2` when client credentials are present and no
//!    password is configured, otherwise `TransportPassword`
//! 3. nothing usable → `FallbackSink`
//!
//! If the chosen rung fails to come up the provisioner does not try the next
//! rung; it degrades straight to the fallback sink for the rest of the
//! process lifetime.

use crate::config::{CredentialSet, DeliveryConfig};
use crate::error::{NotificationError, NotificationResult};
use crate::providers::{
    Channel, ChannelKind, FallbackSink, GraphProvider, MailTransport, SmtpAuth, SmtpConfig,
    SmtpProvider,
};
use crate::token::{OAuthTokenSource, TokenCache};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Lifecycle of the provisioner. Transitions are monotonic; `Ready` and
/// `Degraded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationState {
    Uninitialized,
    Initializing,
    Ready(ChannelKind),
    /// Provisioning failed; all sends go to the fallback sink.
    Degraded,
}

/// Pick the ladder rung the credentials qualify for.
pub fn select_rung(credentials: &CredentialSet) -> ChannelKind {
    if credentials.has_api_credentials() {
        ChannelKind::HttpApi
    } else if credentials.has_mailbox() {
        if credentials.has_client_credentials() && !credentials.has_password() {
            ChannelKind::TransportOAuth2
        } else {
            ChannelKind::TransportPassword
        }
    } else {
        ChannelKind::FallbackSink
    }
}

/// Establishes the channel for a ladder rung.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        kind: ChannelKind,
        credentials: &CredentialSet,
    ) -> NotificationResult<Channel>;
}

/// Connector that builds the real providers.
pub struct LiveConnector {
    config: DeliveryConfig,
}

impl LiveConnector {
    pub fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }

    fn token_cache(
        &self,
        credentials: &CredentialSet,
        tenant: &str,
        scope: &str,
    ) -> NotificationResult<Arc<TokenCache>> {
        let (Some(client_id), Some(client_secret)) =
            (&credentials.client_id, &credentials.client_secret)
        else {
            return Err(NotificationError::ConfigurationIncomplete(
                "client id and client secret are required for token auth".to_string(),
            ));
        };

        let source = OAuthTokenSource::new(
            client_id,
            client_secret,
            &self.config.token_url(tenant),
            scope,
            self.config.request_timeout,
            self.config.connect_timeout,
        )?;

        Ok(Arc::new(TokenCache::new(Arc::new(source))))
    }

    fn smtp_config(&self, mailbox: &str) -> SmtpConfig {
        SmtpConfig::new(&self.config.smtp_host, self.config.smtp_port, mailbox)
            .with_from_name(&self.config.from_name)
            .with_timeout(self.config.request_timeout)
    }
}

/// Tenant for protocol-level token auth: the configured tenant id, else the
/// mailbox domain (the identity provider accepts verified domains as tenants).
fn smtp_tenant(credentials: &CredentialSet, mailbox: &str) -> NotificationResult<String> {
    if let Some(tenant) = &credentials.tenant_id {
        return Ok(tenant.clone());
    }
    mailbox
        .rsplit_once('@')
        .map(|(_, domain)| domain.to_string())
        .filter(|domain| !domain.is_empty())
        .ok_or_else(|| {
            NotificationError::ConfigurationIncomplete(format!(
                "cannot derive tenant from mailbox '{}'",
                mailbox
            ))
        })
}

#[async_trait]
impl ChannelConnector for LiveConnector {
    async fn connect(
        &self,
        kind: ChannelKind,
        credentials: &CredentialSet,
    ) -> NotificationResult<Channel> {
        match kind {
            ChannelKind::HttpApi => {
                let tenant = credentials.tenant_id.as_deref().ok_or_else(|| {
                    NotificationError::ConfigurationIncomplete("tenant id is required".to_string())
                })?;
                let tokens = self.token_cache(credentials, tenant, &self.config.graph_scope)?;

                // One acquisition up front validates the credentials.
                tokens.acquire().await?;

                let provider = GraphProvider::new(
                    &self.config.graph_url,
                    self.config.sender_address(credentials),
                    tokens,
                    self.config.connect_timeout,
                    self.config.request_timeout,
                )?;
                Ok(Channel::HttpApi(Arc::new(provider)))
            }
            ChannelKind::TransportOAuth2 => {
                let mailbox = require_mailbox(credentials)?;
                let tenant = smtp_tenant(credentials, mailbox)?;
                let tokens = self.token_cache(credentials, &tenant, &self.config.smtp_scope)?;
                let provider = SmtpProvider::new(self.smtp_config(mailbox), SmtpAuth::OAuth2(tokens))?;
                Ok(Channel::TransportOAuth2(Arc::new(provider)))
            }
            ChannelKind::TransportPassword => {
                let mailbox = require_mailbox(credentials)?;
                let password = credentials.password.clone().ok_or_else(|| {
                    NotificationError::ConfigurationIncomplete(
                        "mailbox password is required for password auth".to_string(),
                    )
                })?;
                let provider =
                    SmtpProvider::new(self.smtp_config(mailbox), SmtpAuth::Password(password))?;
                Ok(Channel::TransportPassword(Arc::new(provider)))
            }
            ChannelKind::FallbackSink => Ok(Channel::FallbackSink(FallbackSink)),
        }
    }
}

fn require_mailbox(credentials: &CredentialSet) -> NotificationResult<&str> {
    credentials.mailbox.as_deref().ok_or_else(|| {
        NotificationError::ConfigurationIncomplete("mailbox address is required".to_string())
    })
}

#[derive(Clone)]
struct Provisioned {
    channel: Channel,
    degraded: bool,
}

impl Provisioned {
    fn degraded() -> Self {
        Self {
            channel: Channel::FallbackSink(FallbackSink),
            degraded: true,
        }
    }
}

type InFlightProvisioning = Shared<BoxFuture<'static, Provisioned>>;

type ConnectivitySlot = Arc<std::sync::Mutex<Option<JoinHandle<()>>>>;

/// Selects and owns the process's single delivery channel.
pub struct ChannelProvisioner {
    credentials: CredentialSet,
    connector: Arc<dyn ChannelConnector>,
    provisioned: OnceCell<Provisioned>,
    in_flight: Mutex<Option<InFlightProvisioning>>,
    initializing: AtomicBool,
    attempts: AtomicUsize,
    connectivity_check: ConnectivitySlot,
}

impl ChannelProvisioner {
    pub fn new(credentials: CredentialSet, connector: Arc<dyn ChannelConnector>) -> Self {
        Self {
            credentials,
            connector,
            provisioned: OnceCell::new(),
            in_flight: Mutex::new(None),
            initializing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            connectivity_check: Arc::new(std::sync::Mutex::new(None)),
        }
    }

    /// Return the active channel, provisioning it on first use.
    ///
    /// Provisioning runs on its own task. Concurrent callers await one
    /// shared handle to it, and a caller that is cancelled while waiting
    /// neither aborts nor repeats the run.
    pub async fn ensure_initialized(&self) -> &Channel {
        let provisioned = self
            .provisioned
            .get_or_init(|| async { self.join_provisioning().await.await })
            .await;
        &provisioned.channel
    }

    /// Start provisioning on the runtime without waiting for it.
    pub fn spawn_initialization(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.ensure_initialized().await;
        })
    }

    pub fn state(&self) -> InitializationState {
        match self.provisioned.get() {
            Some(p) if p.degraded => InitializationState::Degraded,
            Some(p) => InitializationState::Ready(p.channel.kind()),
            None if self.initializing.load(Ordering::SeqCst) => InitializationState::Initializing,
            None => InitializationState::Uninitialized,
        }
    }

    /// Number of provisioning runs started. Stays at one for the process lifetime.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the post-provisioning connectivity check, if one was started.
    pub async fn wait_for_connectivity_check(&self) {
        let handle = self
            .connectivity_check
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Handle to the provisioning run, starting it if none exists yet.
    async fn join_provisioning(&self) -> InFlightProvisioning {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(running) = in_flight.as_ref() {
            return running.clone();
        }

        self.initializing.store(true, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let task = tokio::spawn(provision(
            self.credentials.clone(),
            Arc::clone(&self.connector),
            Arc::clone(&self.connectivity_check),
        ));
        let running = async move {
            task.await.unwrap_or_else(|e| {
                warn!(
                    error = %e,
                    "Delivery channel provisioning aborted, emails will be logged instead of sent"
                );
                Provisioned::degraded()
            })
        }
        .boxed()
        .shared();

        *in_flight = Some(running.clone());
        running
    }
}

async fn provision(
    credentials: CredentialSet,
    connector: Arc<dyn ChannelConnector>,
    connectivity_check: ConnectivitySlot,
) -> Provisioned {
    let provisioned = match run_ladder(&credentials, connector.as_ref()).await {
        Ok(channel) => {
            info!(channel = %channel.kind(), "Delivery channel ready");
            Provisioned {
                channel,
                degraded: false,
            }
        }
        Err(e) => {
            warn!(
                error = %e,
                "Delivery channel provisioning failed, emails will be logged instead of sent"
            );
            Provisioned::degraded()
        }
    };

    if provisioned.channel.kind().is_protocol_transport() {
        if let Some(transport) = provisioned.channel.transport() {
            let handle = start_connectivity_check(Arc::clone(transport));
            if let Ok(mut slot) = connectivity_check.lock() {
                *slot = Some(handle);
            }
        }
    }

    provisioned
}

async fn run_ladder(
    credentials: &CredentialSet,
    connector: &dyn ChannelConnector,
) -> NotificationResult<Channel> {
    let rung = select_rung(credentials);

    if rung == ChannelKind::FallbackSink {
        info!("No email credentials configured, using log-only delivery");
        return Ok(Channel::FallbackSink(FallbackSink));
    }

    info!(rung = %rung, "Provisioning delivery channel");
    connector
        .connect(rung, credentials)
        .await
        .map_err(|e| match e {
            e @ NotificationError::ChannelProvisioning(_) => e,
            other => NotificationError::ChannelProvisioning(other.to_string()),
        })
}

fn start_connectivity_check(transport: Arc<dyn MailTransport>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match transport.health_check().await {
            Ok(()) => info!(transport = transport.name(), "Connectivity check passed"),
            Err(e) => warn!(
                transport = transport.name(),
                error = %e,
                "Connectivity check failed, channel stays active"
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockTransport;

    fn creds(
        client: bool,
        tenant: bool,
        mailbox: bool,
        password: bool,
    ) -> CredentialSet {
        CredentialSet {
            client_id: client.then(|| "client".to_string()),
            client_secret: client.then(|| "secret".to_string()),
            tenant_id: tenant.then(|| "tenant".to_string()),
            mailbox: mailbox.then(|| "noreply@example.com".to_string()),
            password: password.then(|| "hunter2".to_string()),
        }
    }

    #[test]
    fn test_ladder_selection() {
        assert_eq!(select_rung(&creds(true, true, false, false)), ChannelKind::HttpApi);
        assert_eq!(select_rung(&creds(true, true, true, true)), ChannelKind::HttpApi);
        assert_eq!(
            select_rung(&creds(false, false, true, true)),
            ChannelKind::TransportPassword
        );
        assert_eq!(
            select_rung(&creds(true, false, true, false)),
            ChannelKind::TransportOAuth2
        );
        assert_eq!(
            select_rung(&creds(true, false, true, true)),
            ChannelKind::TransportPassword
        );
        assert_eq!(
            select_rung(&creds(false, false, true, false)),
            ChannelKind::TransportPassword
        );
        assert_eq!(select_rung(&CredentialSet::default()), ChannelKind::FallbackSink);
        assert_eq!(select_rung(&creds(true, false, false, false)), ChannelKind::FallbackSink);
    }

    #[test]
    fn test_smtp_tenant_from_mailbox_domain() {
        let credentials = creds(true, false, true, false);
        assert_eq!(smtp_tenant(&credentials, "noreply@example.com").unwrap(), "example.com");

        let credentials = creds(true, true, true, false);
        assert_eq!(smtp_tenant(&credentials, "noreply@example.com").unwrap(), "tenant");

        assert!(smtp_tenant(&creds(true, false, true, false), "no-domain").is_err());
    }

    #[tokio::test]
    async fn test_no_credentials_never_calls_connector() {
        let mut connector = MockChannelConnector::new();
        connector.expect_connect().never();

        let provisioner = ChannelProvisioner::new(CredentialSet::default(), Arc::new(connector));
        assert_eq!(provisioner.state(), InitializationState::Uninitialized);

        let channel = provisioner.ensure_initialized().await;
        assert_eq!(channel.kind(), ChannelKind::FallbackSink);
        assert_eq!(
            provisioner.state(),
            InitializationState::Ready(ChannelKind::FallbackSink)
        );
    }

    #[tokio::test]
    async fn test_failed_rung_degrades_without_cascading() {
        let mut connector = MockChannelConnector::new();
        connector
            .expect_connect()
            .withf(|kind, _| *kind == ChannelKind::HttpApi)
            .times(1)
            .returning(|_, _| {
                Err(NotificationError::CredentialAcquisition("bad secret".to_string()))
            });

        // Mailbox + password would qualify for rung 2, but it must not be tried.
        let provisioner =
            ChannelProvisioner::new(creds(true, true, true, true), Arc::new(connector));

        let channel = provisioner.ensure_initialized().await;
        assert_eq!(channel.kind(), ChannelKind::FallbackSink);
        assert_eq!(provisioner.state(), InitializationState::Degraded);

        // Terminal: later calls do not re-provision.
        provisioner.ensure_initialized().await;
        assert_eq!(provisioner.attempts(), 1);
    }

    #[tokio::test]
    async fn test_connectivity_failure_keeps_channel() {
        let transport = MockTransport::failing("connection refused");
        let recorder = transport.clone();

        let mut connector = MockChannelConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move |_, _| Ok(Channel::TransportPassword(Arc::new(transport.clone()))));

        let provisioner =
            ChannelProvisioner::new(creds(false, false, true, true), Arc::new(connector));

        provisioner.ensure_initialized().await;
        provisioner.wait_for_connectivity_check().await;

        assert_eq!(recorder.health_checks(), 1);
        assert_eq!(
            provisioner.state(),
            InitializationState::Ready(ChannelKind::TransportPassword)
        );
    }

    #[tokio::test]
    async fn test_http_api_skips_connectivity_check() {
        let transport = MockTransport::new();
        let recorder = transport.clone();

        let mut connector = MockChannelConnector::new();
        connector
            .expect_connect()
            .times(1)
            .returning(move |_, _| Ok(Channel::HttpApi(Arc::new(transport.clone()))));

        let provisioner =
            ChannelProvisioner::new(creds(true, true, false, false), Arc::new(connector));

        provisioner.ensure_initialized().await;
        provisioner.wait_for_connectivity_check().await;

        assert_eq!(recorder.health_checks(), 0);
    }

    #[tokio::test]
    async fn test_live_connector_password_rung_requires_password() {
        let connector = LiveConnector::new(DeliveryConfig::default());
        let err = connector
            .connect(ChannelKind::TransportPassword, &creds(false, false, true, false))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::ConfigurationIncomplete(_)));
    }

    #[tokio::test]
    async fn test_live_connector_builds_password_transport() {
        let connector = LiveConnector::new(DeliveryConfig::default());
        let channel = connector
            .connect(ChannelKind::TransportPassword, &creds(false, false, true, true))
            .await
            .unwrap();
        assert_eq!(channel.kind(), ChannelKind::TransportPassword);
        assert_eq!(channel.transport().map(|t| t.name()), Some("smtp"));
    }

    struct SlowConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelConnector for SlowConnector {
        async fn connect(
            &self,
            _kind: ChannelKind,
            _credentials: &CredentialSet,
        ) -> NotificationResult<Channel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            Ok(Channel::TransportPassword(Arc::new(MockTransport::new())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_first_caller_does_not_restart_provisioning() {
        let connector = Arc::new(SlowConnector {
            calls: AtomicUsize::new(0),
        });
        let provisioner = Arc::new(ChannelProvisioner::new(
            creds(false, false, true, true),
            connector.clone(),
        ));

        let first = {
            let provisioner = Arc::clone(&provisioner);
            tokio::spawn(async move {
                provisioner.ensure_initialized().await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(provisioner.state(), InitializationState::Initializing);

        let channel = provisioner.ensure_initialized().await;
        assert_eq!(channel.kind(), ChannelKind::TransportPassword);
        assert_eq!(provisioner.attempts(), 1);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }
}
