/// Token manager tests
/// Single-flight refresh, failure fan-out and the HTTP client-credentials exchange
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use rust_cartorio_api::registry::token::{
    AuthGrant, Authenticator, HttpAuthenticator, ManualClock, TokenManager, TokenSettings,
};
use rust_cartorio_api::registry::{ErrorKind, RegistryError};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Authenticator that counts exchanges and takes a while to answer, so
/// concurrent callers overlap with the one in flight.
struct SlowAuthenticator {
    calls: AtomicU64,
    fail_first: u64,
}

impl SlowAuthenticator {
    fn new(fail_first: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            fail_first,
        })
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for SlowAuthenticator {
    async fn authenticate(&self) -> Result<AuthGrant, RegistryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if n <= self.fail_first {
            return Err(RegistryError::Auth("invalid client credentials".to_string()));
        }
        Ok(AuthGrant {
            access_token: format!("token-{}", n),
            expires_in: Some(600),
        })
    }
}

fn manager(auth: Arc<SlowAuthenticator>) -> (Arc<TokenManager>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    ));
    let manager = Arc::new(TokenManager::new(
        auth,
        clock.clone(),
        TokenSettings::default(),
    ));
    (manager, clock)
}

#[tokio::test]
async fn test_concurrent_callers_share_one_exchange() {
    let auth = SlowAuthenticator::new(0);
    let (manager, _clock) = manager(auth.clone());

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_valid_token().await })
        })
        .collect();

    let results = join_all(handles).await;
    for result in results {
        let credential = result.unwrap().unwrap();
        assert_eq!(credential.access_token(), "token-1");
    }
    assert_eq!(auth.calls(), 1);
    assert_eq!(manager.exchange_count(), 1);
}

#[tokio::test]
async fn test_failed_exchange_reaches_every_waiter() {
    let auth = SlowAuthenticator::new(1);
    let (manager, _clock) = manager(auth.clone());

    let results = join_all((0..10).map(|_| manager.get_valid_token())).await;
    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }
    assert_eq!(auth.calls(), 1);
    assert!(manager.cached().is_none());

    // A later call starts a fresh exchange
    let credential = manager.get_valid_token().await.unwrap();
    assert_eq!(credential.access_token(), "token-2");
    assert_eq!(auth.calls(), 2);
}

#[tokio::test]
async fn test_expired_credential_is_refreshed_once() {
    let auth = SlowAuthenticator::new(0);
    let (manager, clock) = manager(auth.clone());

    manager.get_valid_token().await.unwrap();
    clock.advance(Duration::from_secs(600));

    let results = join_all((0..5).map(|_| manager.get_valid_token())).await;
    for result in results {
        assert_eq!(result.unwrap().access_token(), "token-2");
    }
    assert_eq!(auth.calls(), 2);
}

#[tokio::test]
async fn test_concurrent_rejections_share_one_reauthentication() {
    let auth = SlowAuthenticator::new(0);
    let (manager, _clock) = manager(auth.clone());

    let rejected = manager.get_valid_token().await.unwrap();
    let results = join_all((0..8).map(|_| manager.invalidate_and_refresh(&rejected))).await;
    for result in results {
        assert_eq!(result.unwrap().access_token(), "token-2");
    }
    assert_eq!(auth.calls(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_new_exchange() {
    let auth = SlowAuthenticator::new(0);
    let (manager, _clock) = manager(auth.clone());

    manager.get_valid_token().await.unwrap();
    manager.invalidate();
    assert!(manager.cached().is_none());

    let credential = manager.get_valid_token().await.unwrap();
    assert_eq!(credential.access_token(), "token-2");
}

#[tokio::test]
async fn test_http_authenticator_exchange() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/token"))
        .and(body_json(json!({
            "clientId": "client",
            "clientSecret": "secret"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "abc",
            "expiresIn": 120
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let authenticator = HttpAuthenticator::new(
        reqwest::Client::new(),
        &format!("{}/api/", mock_server.uri()),
        "client".to_string(),
        "secret".to_string(),
    );
    let grant = authenticator.authenticate().await.unwrap();
    assert_eq!(grant.access_token, "abc");
    assert_eq!(grant.expires_in, Some(120));
}

#[tokio::test]
async fn test_http_authenticator_rejection_is_auth_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_client"})),
        )
        .mount(&mock_server)
        .await;

    let authenticator = HttpAuthenticator::new(
        reqwest::Client::new(),
        &mock_server.uri(),
        "client".to_string(),
        "wrong".to_string(),
    );
    let err = authenticator.authenticate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(err.message().contains("invalid_client"));
}

#[tokio::test]
async fn test_http_authenticator_rejects_empty_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "  "})))
        .mount(&mock_server)
        .await;

    let authenticator = HttpAuthenticator::new(
        reqwest::Client::new(),
        &mock_server.uri(),
        "client".to_string(),
        "secret".to_string(),
    );
    let err = authenticator.authenticate().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
}
