//! Bearer token cache with single-flight refresh.
//!
//! The cache holds exactly one token. Reads are a shared lock plus an
//! instant comparison. When the token is missing or inside the expiry skew,
//! the first caller starts one silent-then-forced acquisition and parks a
//! shared handle to it; every other stale caller awaits that same handle,
//! so a failure is delivered to all of them instead of being retried.

use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken, Scope,
    TokenResponse as OAuth2TokenResponse, TokenUrl,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Safety margin subtracted from a token's expiry before it is considered usable.
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Lifetime assumed when the identity provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// A token as returned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: Duration,
}

/// Cached token value and its expiry instant.
#[derive(Debug, Clone)]
pub struct TokenState {
    token: String,
    expires_at: Instant,
}

impl TokenState {
    pub fn new(token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Usable iff `now < expires_at - skew`.
    pub fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_EXPIRY_SKEW < self.expires_at
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }
}

/// Source of bearer tokens with two acquisition paths.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Reuse an existing session with the identity provider, if any.
    async fn acquire_silent(&self) -> NotificationResult<IssuedToken>;

    /// Run a full client-credentials grant.
    async fn acquire_forced(&self) -> NotificationResult<IssuedToken>;
}

/// Upper bound on a cached token's lifetime, whatever the provider reports.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Result of one refresh sequence, shared by every caller that joined it.
type RefreshOutcome = Result<TokenState, String>;

type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Single-slot token cache.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    state: RwLock<Option<TokenState>>,
    in_flight: Mutex<Option<InFlightRefresh>>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            state: RwLock::new(None),
            in_flight: Mutex::new(None),
        }
    }

    /// Create a cache that already holds `state`.
    pub fn with_state(source: Arc<dyn TokenSource>, state: TokenState) -> Self {
        Self {
            source,
            state: RwLock::new(Some(state)),
            in_flight: Mutex::new(None),
        }
    }

    /// Return a usable bearer token, refreshing it if needed.
    ///
    /// Callers that find the token stale while a refresh is running join
    /// that refresh and receive its outcome, success or failure. Fails with
    /// [`NotificationError::CredentialAcquisition`] when both acquisition
    /// paths fail. Callers must not retry.
    pub async fn acquire(&self) -> NotificationResult<String> {
        if let Some(token) = self.fresh_token().await {
            return Ok(token);
        }

        let refresh = {
            let mut in_flight = self.in_flight.lock().await;

            // A refresh may have landed while we waited for the slot.
            if let Some(token) = self.fresh_token().await {
                return Ok(token);
            }

            match in_flight.as_ref() {
                Some(running) => running.clone(),
                None => {
                    let started = run_refresh(Arc::clone(&self.source)).boxed().shared();
                    *in_flight = Some(started.clone());
                    started
                }
            }
        };

        let outcome = refresh.clone().await;

        // Whoever reaches the slot first publishes the outcome and clears it.
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.as_ref().is_some_and(|running| running.ptr_eq(&refresh)) {
                if let Ok(state) = &outcome {
                    *self.state.write().await = Some(state.clone());
                }
                *in_flight = None;
            }
        }

        outcome
            .map(|state| state.token)
            .map_err(NotificationError::CredentialAcquisition)
    }

    /// Snapshot of the cached state, if any.
    pub async fn current(&self) -> Option<TokenState> {
        self.state.read().await.clone()
    }

    async fn fresh_token(&self) -> Option<String> {
        let state = self.state.read().await;
        state
            .as_ref()
            .filter(|s| s.is_fresh(Instant::now()))
            .map(|s| s.token.clone())
    }
}

/// One silent-then-forced sequence.
async fn run_refresh(source: Arc<dyn TokenSource>) -> RefreshOutcome {
    let issued = match source.acquire_silent().await {
        Ok(issued) => {
            debug!(expires_in_secs = issued.expires_in.as_secs(), "Token acquired silently");
            issued
        }
        Err(silent_err) => {
            debug!(error = %silent_err, "Silent token acquisition failed, forcing grant");
            match source.acquire_forced().await {
                Ok(issued) => {
                    info!(
                        expires_in_secs = issued.expires_in.as_secs(),
                        "Token acquired via client credentials"
                    );
                    issued
                }
                Err(forced_err) => {
                    warn!(
                        silent_error = %silent_err,
                        forced_error = %forced_err,
                        "Token acquisition failed"
                    );
                    return Err(match forced_err {
                        NotificationError::CredentialAcquisition(message) => message,
                        other => other.to_string(),
                    });
                }
            }
        }
    };

    if issued.expires_in > MAX_TOKEN_LIFETIME {
        warn!(
            expires_in_secs = issued.expires_in.as_secs(),
            "Token lifetime exceeds maximum, clamping"
        );
    }
    let lifetime = issued.expires_in.min(MAX_TOKEN_LIFETIME);
    let expires_at = Instant::now()
        .checked_add(lifetime)
        .ok_or_else(|| format!("token lifetime of {}s is out of range", lifetime.as_secs()))?;

    Ok(TokenState::new(issued.access_token, expires_at))
}

type GrantClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 token source for a confidential client.
///
/// The silent path exchanges a refresh token retained from an earlier
/// grant. The forced path runs the client-credentials grant.
pub struct OAuthTokenSource {
    client: GrantClient,
    http: reqwest::Client,
    scope: String,
    refresh_token: Mutex<Option<RefreshToken>>,
}

impl OAuthTokenSource {
    pub fn new(
        client_id: &str,
        client_secret: &str,
        token_url: &str,
        scope: &str,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> NotificationResult<Self> {
        let token_url = TokenUrl::new(token_url.to_string()).map_err(|e| {
            NotificationError::ChannelProvisioning(format!("Invalid token URL: {}", e))
        })?;

        let client = BasicClient::new(ClientId::new(client_id.to_string()))
            .set_client_secret(ClientSecret::new(client_secret.to_string()))
            .set_token_uri(token_url);

        // Token endpoints must not redirect.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                NotificationError::ChannelProvisioning(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            http,
            scope: scope.to_string(),
            refresh_token: Mutex::new(None),
        })
    }

    async fn remember(&self, response: &BasicTokenResponse) -> IssuedToken {
        if let Some(refresh) = response.refresh_token() {
            *self.refresh_token.lock().await = Some(refresh.clone());
        }
        IssuedToken {
            access_token: response.access_token().secret().clone(),
            expires_in: response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME),
        }
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn acquire_silent(&self) -> NotificationResult<IssuedToken> {
        let refresh = self.refresh_token.lock().await.clone().ok_or_else(|| {
            NotificationError::CredentialAcquisition("no session to reuse".to_string())
        })?;

        let response = self
            .client
            .exchange_refresh_token(&refresh)
            .add_scope(Scope::new(self.scope.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                NotificationError::CredentialAcquisition(format!("Refresh grant failed: {}", e))
            })?;

        Ok(self.remember(&response).await)
    }

    async fn acquire_forced(&self) -> NotificationResult<IssuedToken> {
        let response = self
            .client
            .exchange_client_credentials()
            .add_scope(Scope::new(self.scope.clone()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                NotificationError::CredentialAcquisition(format!(
                    "Client credentials grant failed: {}",
                    e
                ))
            })?;

        Ok(self.remember(&response).await)
    }
}
