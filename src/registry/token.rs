//! Bearer credential lifecycle for the registry API.
//!
//! The token manager caches one credential per configured client and refreshes
//! it on demand:
//! - a valid cached credential (now < expiry - margin) is returned without I/O
//! - otherwise exactly one authentication exchange runs, shared by every
//!   caller that arrives while it is in flight
//! - a failed exchange is handed to every waiter and leaves the cache empty
//! - `invalidate_and_refresh` drops a credential the upstream rejected and
//!   joins (or starts) a single re-authentication

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::normalizer::{extract_message, RegistryError};

/// Default refresh safety margin before the real expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the upstream does not report `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Source of the current time, injected so tests can move it by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now = now.checked_add_signed(to_chrono(by)).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Raw result of one authentication exchange.
#[derive(Clone, Deserialize)]
pub struct AuthGrant {
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    /// Lifetime in seconds, when the upstream reports one.
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<i64>,
}

impl fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGrant")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Performs one authentication exchange against the registry.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> Result<AuthGrant, RegistryError>;
}

/// Client-credentials exchange over HTTP.
pub struct HttpAuthenticator {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpAuthenticator {
    /// Path of the authentication endpoint, relative to the registry base URL.
    pub const TOKEN_PATH: &'static str = "auth/token";

    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            client,
            token_url: format!("{}/{}", base_url.trim_end_matches('/'), Self::TOKEN_PATH),
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authenticate(&self) -> Result<AuthGrant, RegistryError> {
        tracing::info!("Authenticating against registry: {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .json(&serde_json::json!({
                "clientId": self.client_id,
                "clientSecret": self.client_secret,
            }))
            .send()
            .await
            .map_err(|e| RegistryError::Auth(format!("Authentication service unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RegistryError::Auth(format!("Failed to read authentication response: {}", e)))?;

        if !status.is_success() {
            let detail = extract_message(&body).unwrap_or_else(|| status.to_string());
            tracing::error!("Registry authentication rejected ({}): {}", status, detail);
            return Err(RegistryError::Auth(format!(
                "Registry rejected credentials ({}): {}",
                status.as_u16(),
                detail
            )));
        }

        let grant: AuthGrant = serde_json::from_str(&body).map_err(|e| {
            RegistryError::Auth(format!("Malformed authentication response: {}", e))
        })?;

        if grant.access_token.trim().is_empty() {
            return Err(RegistryError::Auth(
                "Authentication response carried an empty token".to_string(),
            ));
        }

        Ok(grant)
    }
}

/// Cached bearer credential.
#[derive(Clone, PartialEq)]
pub struct Credential {
    access_token: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: String, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            issued_at,
            expires_at,
        }
    }

    fn from_grant(grant: AuthGrant, issued_at: DateTime<Utc>, default_ttl: Duration) -> Self {
        let ttl = grant
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| chrono::Duration::seconds(secs.min(i64::from(u32::MAX))))
            .unwrap_or_else(|| to_chrono(default_ttl));
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(grant.access_token, issued_at, expires_at)
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Usable at `now` while keeping `margin` before the real expiry.
    ///
    /// The margin never exceeds half the credential's lifetime, so a short
    /// lived grant is still reused for a while instead of being stale on
    /// arrival.
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = margin.min(self.lifetime() / 2);
        match self.expires_at.checked_sub_signed(to_chrono(margin)) {
            Some(refresh_at) => now < refresh_at,
            None => false,
        }
    }

    /// Time between issue and expiry; zero for an already expired grant.
    pub fn lifetime(&self) -> Duration {
        self.expires_at
            .signed_duration_since(self.issued_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Short SHA-256 fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.access_token.as_bytes());
        hex::encode(&digest[..6])
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("fingerprint", &self.fingerprint())
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Expiry handling knobs.
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    /// Refresh this long before the real expiry.
    pub refresh_margin: Duration,
    /// Lifetime used when the upstream omits `expires_in`.
    pub default_ttl: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            default_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

type AuthFlight = Shared<BoxFuture<'static, Result<Credential, RegistryError>>>;

#[derive(Default)]
struct TokenState {
    credential: Option<Credential>,
    in_flight: Option<AuthFlight>,
}

/// Owns the registry credential. One instance per configured client.
pub struct TokenManager {
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    settings: TokenSettings,
    // Never held across an await.
    state: Arc<Mutex<TokenState>>,
    exchanges: Arc<AtomicU64>,
}

impl TokenManager {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
        settings: TokenSettings,
    ) -> Self {
        Self {
            authenticator,
            clock,
            settings,
            state: Arc::new(Mutex::new(TokenState::default())),
            exchanges: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a credential valid for at least the refresh margin (capped at
    /// half the credential's lifetime), authenticating when the cache is empty or stale.
    pub async fn get_valid_token(&self) -> Result<Credential, RegistryError> {
        let flight = {
            let mut state = lock(&self.state);
            if let Some(credential) = state.credential.as_ref() {
                if credential.is_valid_at(self.clock.now(), self.settings.refresh_margin) {
                    return Ok(credential.clone());
                }
                tracing::debug!(
                    "Registry credential {} expired or inside refresh margin",
                    credential.fingerprint()
                );
                state.credential = None;
            }
            self.join_or_start(&mut state)
        };
        flight.await
    }

    /// Drops `rejected` if it is still the cached credential and returns a
    /// freshly authenticated one.
    ///
    /// Concurrent callers holding the same rejected credential share one
    /// re-authentication; a caller whose credential was already replaced gets
    /// the replacement without another exchange.
    pub async fn invalidate_and_refresh(
        &self,
        rejected: &Credential,
    ) -> Result<Credential, RegistryError> {
        let flight = {
            let mut state = lock(&self.state);
            match state.credential.as_ref() {
                Some(current)
                    if current.access_token != rejected.access_token
                        && current.is_valid_at(self.clock.now(), self.settings.refresh_margin) =>
                {
                    return Ok(current.clone());
                }
                Some(_) => {
                    tracing::warn!(
                        "Registry rejected credential {}, invalidating",
                        rejected.fingerprint()
                    );
                    state.credential = None;
                }
                None => {}
            }
            self.join_or_start(&mut state)
        };
        flight.await
    }

    /// Forgets the cached credential without re-authenticating.
    pub fn invalidate(&self) {
        lock(&self.state).credential = None;
    }

    /// The cached credential, if any, without validity checks.
    pub fn cached(&self) -> Option<Credential> {
        lock(&self.state).credential.clone()
    }

    /// Number of authentication exchanges started so far.
    pub fn exchange_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn join_or_start(&self, state: &mut TokenState) -> AuthFlight {
        if let Some(flight) = state.in_flight.as_ref() {
            return flight.clone();
        }

        let authenticator = Arc::clone(&self.authenticator);
        let clock = Arc::clone(&self.clock);
        let shared_state = Arc::clone(&self.state);
        let default_ttl = self.settings.default_ttl;
        let refresh_margin = self.settings.refresh_margin;
        let exchange = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;

        let flight = async move {
            tracing::info!("Starting registry authentication exchange #{}", exchange);
            let outcome = authenticator
                .authenticate()
                .await
                .map(|grant| Credential::from_grant(grant, clock.now(), default_ttl));

            let mut state = lock(&shared_state);
            state.in_flight = None;
            match &outcome {
                Ok(credential) => {
                    tracing::info!(
                        "Registry credential {} valid until {}",
                        credential.fingerprint(),
                        credential.expires_at
                    );
                    if credential.lifetime() <= refresh_margin {
                        tracing::warn!(
                            "Registry credential lifetime {:?} is within the refresh margin {:?}; refreshing at half its lifetime",
                            credential.lifetime(),
                            refresh_margin
                        );
                    }
                    state.credential = Some(credential.clone());
                }
                Err(e) => {
                    tracing::error!("Registry authentication exchange #{} failed: {}", exchange, e);
                    state.credential = None;
                }
            }
            outcome
        }
        .boxed()
        .shared();

        state.in_flight = Some(flight.clone());
        flight
    }
}

fn lock(state: &Mutex<TokenState>) -> MutexGuard<'_, TokenState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
