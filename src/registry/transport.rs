use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::normalizer::{normalize_reqwest, normalize_status, RegistryError};
use super::retry::RetryPolicy;
use super::token::{Credential, TokenManager};
use crate::models::OperationAck;

/// Correlation header sent with every attempt of a logical request.
///
/// The value stays the same across retries, so an upstream that
/// deduplicates on it can treat it as an idempotency key.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// A request against the registry API, relative to the configured base URL.
///
/// Path segments are percent-encoded when the URL is built, so opaque hashes
/// can be appended as-is.
#[derive(Debug, Clone)]
pub struct RegistryRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl RegistryRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends one path segment (encoded verbatim, slashes included).
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Adds query pairs; callers pass only the parameters that are set.
    pub fn query<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path for logs, e.g. `acompanhamento/protocolos/abc`.
    pub fn path(&self) -> String {
        self.segments.join("/")
    }
}

/// Outcome of one HTTP attempt.
enum Attempt {
    Success(Value),
    Unauthorized(String),
    Failed(RegistryError),
}

/// Executes registry requests: bearer auth, retries with backoff, a single
/// re-authentication on 401, and an overall deadline per request.
///
/// Non-idempotent requests (POST) are only replayed when the previous attempt
/// provably never reached the registry (connect failure) or the registry
/// answered with a retryable status. A per-attempt timeout or a dropped
/// connection mid-exchange leaves the outcome unknown, so those fail without
/// a replay.
pub struct Transport {
    client: reqwest::Client,
    base_url: Url,
    tokens: Arc<TokenManager>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl Transport {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        tokens: Arc<TokenManager>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let base_url = Url::parse(base_url).map_err(|e| RegistryError::Transport {
            status: None,
            message: format!("Invalid registry base URL {}: {}", base_url, e),
            retryable: false,
        })?;
        if base_url.cannot_be_a_base() {
            return Err(RegistryError::Transport {
                status: None,
                message: format!("Registry base URL cannot carry paths: {}", base_url),
                retryable: false,
            });
        }

        Ok(Self {
            client,
            base_url,
            tokens,
            retry,
            request_timeout,
        })
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Runs the request and returns the parsed JSON body (`null` when empty).
    ///
    /// Every failure is already normalized; an exceeded overall deadline is
    /// `Timeout` no matter how many attempts were left.
    pub async fn execute(&self, request: &RegistryRequest) -> Result<Value, RegistryError> {
        let request_id = Uuid::new_v4();
        tracing::info!(
            request_id = %request_id,
            "Registry {} /{}",
            request.method,
            request.path()
        );

        match tokio::time::timeout(
            self.request_timeout,
            self.execute_with_retry(request, request_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    request_id = %request_id,
                    "Registry {} /{} exceeded deadline of {:?}",
                    request.method,
                    request.path(),
                    self.request_timeout
                );
                Err(RegistryError::Timeout(format!(
                    "{} /{} did not complete within {:?}",
                    request.method,
                    request.path(),
                    self.request_timeout
                )))
            }
        }
    }

    /// Runs the request and decodes the body into `T`.
    pub async fn execute_as<T: DeserializeOwned>(
        &self,
        request: &RegistryRequest,
        context: &str,
    ) -> Result<T, RegistryError> {
        let value = self.execute(request).await?;
        decode(value, context)
    }

    async fn execute_with_retry(
        &self,
        request: &RegistryRequest,
        request_id: Uuid,
    ) -> Result<Value, RegistryError> {
        let url = self.build_url(request)?;
        let mut failures: u32 = 0;
        let mut reauthenticated = false;

        loop {
            let credential = self.tokens.get_valid_token().await?;

            match self.send_once(request, &url, &credential, request_id).await {
                Attempt::Success(value) => return Ok(value),
                Attempt::Unauthorized(_) if !reauthenticated => {
                    tracing::warn!(
                        request_id = %request_id,
                        "Registry answered 401 for credential {}, re-authenticating once",
                        credential.fingerprint()
                    );
                    reauthenticated = true;
                    self.tokens.invalidate_and_refresh(&credential).await?;
                }
                Attempt::Unauthorized(body) => {
                    tracing::error!(
                        request_id = %request_id,
                        "Registry still answered 401 after re-authentication"
                    );
                    return Err(normalize_status(StatusCode::UNAUTHORIZED, &body));
                }
                Attempt::Failed(err) if err.is_retryable() => {
                    failures += 1;
                    if !self.retry.should_retry(failures) {
                        tracing::error!(
                            request_id = %request_id,
                            "Registry {} /{} failed after {} attempt(s): {}",
                            request.method,
                            request.path(),
                            failures,
                            err
                        );
                        return Err(err);
                    }
                    let delay = self.retry.delay_for(failures);
                    tracing::warn!(
                        request_id = %request_id,
                        "Registry attempt {}/{} failed ({}), retrying in {:?}",
                        failures,
                        self.retry.max_attempts(),
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Failed(err) => {
                    tracing::warn!(
                        request_id = %request_id,
                        "Registry {} /{} rejected: {}",
                        request.method,
                        request.path(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(
        &self,
        request: &RegistryRequest,
        url: &Url,
        credential: &Credential,
        request_id: Uuid,
    ) -> Attempt {
        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .bearer_auth(credential.access_token())
            .header(ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, request_id.to_string());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Failed(send_failure(request, &e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Attempt::Failed(send_failure(request, &e)),
        };

        if status == StatusCode::UNAUTHORIZED {
            return Attempt::Unauthorized(body);
        }
        if !status.is_success() {
            return Attempt::Failed(normalize_status(status, &body));
        }

        match parse_body(&body) {
            Ok(value) => Attempt::Success(value),
            Err(e) => Attempt::Failed(e),
        }
    }

    fn build_url(&self, request: &RegistryRequest) -> Result<Url, RegistryError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| RegistryError::Transport {
                status: None,
                message: format!("Registry base URL cannot carry paths: {}", self.base_url),
                retryable: false,
            })?;
            path.pop_if_empty().extend(&request.segments);
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

/// Normalizes a failed send. When the request may already have been applied
/// upstream and replaying it is unsafe, the error is made non-retryable.
fn send_failure(request: &RegistryRequest, err: &reqwest::Error) -> RegistryError {
    let normalized = normalize_reqwest(err);
    if !normalized.is_retryable() || err.is_connect() || request.method.is_idempotent() {
        return normalized;
    }
    RegistryError::Transport {
        status: None,
        message: format!(
            "{} /{} outcome unknown, not replayed: {}",
            request.method,
            request.path(),
            normalized
        ),
        retryable: false,
    }
}

/// Rejects blank hashes before any network I/O.
pub fn require_hash(hash: &str) -> Result<&str, RegistryError> {
    let trimmed = hash.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::Validation(
            "hash must not be empty".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Encodes a request payload as a JSON body.
pub fn to_body<T: Serialize>(payload: &T) -> Result<Value, RegistryError> {
    serde_json::to_value(payload)
        .map_err(|e| RegistryError::Validation(format!("Payload cannot be encoded: {}", e)))
}

/// Decodes a JSON value into the expected shape; anything else is a
/// non-retryable transport error.
pub fn decode<T: DeserializeOwned>(value: Value, context: &str) -> Result<T, RegistryError> {
    serde_json::from_value(value).map_err(|e| RegistryError::unexpected_shape(context, e))
}

/// Decodes the body of a mutating call that may answer with nothing, a bare
/// message string, or an object.
pub fn decode_ack(value: Value, context: &str) -> Result<OperationAck, RegistryError> {
    match value {
        Value::Null => Ok(OperationAck::default()),
        Value::Bool(true) => Ok(OperationAck::default()),
        Value::String(mensagem) => Ok(OperationAck {
            mensagem: Some(mensagem),
            ..Default::default()
        }),
        other => decode(other, context),
    }
}

fn parse_body(body: &str) -> Result<Value, RegistryError> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| RegistryError::unexpected_shape("registry", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::normalizer::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_request_path_and_query() {
        let request = RegistryRequest::get("/acompanhamento/protocolos/")
            .segment("abc")
            .query([("pagina", "1")]);
        assert_eq!(request.path(), "acompanhamento/protocolos/abc");
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.query, vec![("pagina".to_string(), "1".to_string())]);
    }

    #[test]
    fn test_require_hash() {
        assert_eq!(require_hash(" abc ").unwrap(), "abc");
        assert_eq!(
            require_hash("   ").unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_parse_body_handles_empty_and_malformed() {
        assert_eq!(parse_body("").unwrap(), Value::Null);
        assert_eq!(parse_body("{\"a\":1}").unwrap(), json!({"a": 1}));

        let err = parse_body("<html>oops</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_decode_ack_variants() {
        assert_eq!(decode_ack(Value::Null, "x").unwrap(), OperationAck::default());
        assert_eq!(
            decode_ack(json!("Cancelada"), "x").unwrap().mensagem.as_deref(),
            Some("Cancelada")
        );
        assert_eq!(
            decode_ack(json!([1, 2]), "x").unwrap_err().kind(),
            ErrorKind::Transport
        );
    }
}
