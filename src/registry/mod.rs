//! Registry (cartório) integration client.
//!
//! A caller builds one [`RegistryClient`] from configuration and invokes a
//! protocol or billing operation on it. Each operation asks the token manager
//! for a valid credential, runs one or more transport requests, and returns a
//! typed result or one [`RegistryError`].

pub mod billing;
pub mod normalizer;
pub mod protocols;
pub mod retry;
pub mod token;
pub mod transport;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

pub use billing::BillingService;
pub use normalizer::{ErrorKind, RegistryError};
pub use protocols::ProtocolService;
pub use token::{Authenticator, Clock, Credential, HttpAuthenticator, SystemClock, TokenManager};
pub use transport::{RegistryRequest, Transport};

/// Entry point to the registry back office. Cheap to clone; clones share the
/// cached credential.
#[derive(Clone)]
pub struct RegistryClient {
    transport: Arc<Transport>,
}

impl RegistryClient {
    /// Creates a client that authenticates with the configured client
    /// credentials against the registry itself.
    pub fn new(config: &Config) -> Result<Self, RegistryError> {
        let http = build_http_client(config)?;
        let authenticator = Arc::new(HttpAuthenticator::new(
            http.clone(),
            &config.cartorio_base_url,
            config.cartorio_client_id.clone(),
            config.cartorio_client_secret.clone(),
        ));
        Self::with_authenticator(config, http, authenticator, Arc::new(SystemClock))
    }

    /// Creates a client with an injected authenticator and clock.
    pub fn with_authenticator(
        config: &Config,
        http: reqwest::Client,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RegistryError> {
        let tokens = Arc::new(TokenManager::new(
            authenticator,
            clock,
            config.token_settings(),
        ));
        let transport = Transport::new(
            http,
            &config.cartorio_base_url,
            tokens,
            config.retry_policy(),
            config.request_timeout(),
        )?;

        tracing::info!("✓ Registry client initialized: {}", config.cartorio_base_url);
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Protocol tracking (Acompanhamento) operations.
    pub fn protocols(&self) -> ProtocolService {
        ProtocolService::new(Arc::clone(&self.transport))
    }

    /// Billing (Cobrança) operations.
    pub fn billing(&self) -> BillingService {
        BillingService::new(Arc::clone(&self.transport))
    }

    pub fn tokens(&self) -> &TokenManager {
        self.transport.tokens()
    }
}

/// HTTP client shared by the transport and the authenticator; its timeout is
/// the per-attempt deadline.
pub fn build_http_client(config: &Config) -> Result<reqwest::Client, RegistryError> {
    reqwest::Client::builder()
        .timeout(config.attempt_timeout())
        .build()
        .map_err(|e| RegistryError::Transport {
            status: None,
            message: format!("Failed to create registry HTTP client: {}", e),
            retryable: false,
        })
}

/// Runs `operation` until it finishes or `cancel` fires. Cancellation drops
/// the operation, aborting any in-flight HTTP call or backoff sleep.
pub async fn with_cancellation<T, F>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!("Registry operation canceled by caller");
            Err(RegistryError::Canceled)
        }
        result = operation => result,
    }
}

/// Runs `operation` with a caller-supplied deadline, failing with `Timeout`
/// when it is exceeded.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    tokio::time::timeout(deadline, operation)
        .await
        .unwrap_or_else(|_| {
            Err(RegistryError::Timeout(format!(
                "operation did not complete within {:?}",
                deadline
            )))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = with_cancellation(&cancel, std::future::pending()).await;
        assert_eq!(result, Err(RegistryError::Canceled));
    }

    #[tokio::test]
    async fn test_completed_operation_passes_through() {
        let cancel = CancellationToken::new();
        let result = with_cancellation(&cancel, async { Ok::<_, RegistryError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_maps_to_timeout() {
        let result: Result<(), _> =
            with_deadline(Duration::from_millis(50), std::future::pending()).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }
}
