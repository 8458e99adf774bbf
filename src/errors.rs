use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::registry::{ErrorKind, RegistryError};

/// Route-layer error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Failure reported by the registry client, already normalized.
    Registry(RegistryError),
    /// Bad request error (invalid input at the route layer).
    BadRequest(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Registry(e) => write!(f, "{}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// HTTP status for each registry error kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Canceled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    /// Maps each error to a status code and a `{"error", "kind"}` JSON body,
    /// logging by severity.
    fn into_response(self) -> Response {
        let (status, kind, error_message) = match &self {
            AppError::Registry(e) => {
                let kind = e.kind();
                match kind {
                    ErrorKind::Transport | ErrorKind::Timeout => {
                        tracing::error!("Registry error: {}", e)
                    }
                    ErrorKind::Auth => tracing::warn!("Registry authentication failure: {}", e),
                    _ => tracing::info!("Registry rejected request: {}", e),
                }
                (status_for(kind), kind.as_str(), e.message().to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status, body).into_response()
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::Registry(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_kinds_map_to_statuses() {
        let cases = [
            (RegistryError::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (RegistryError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (RegistryError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                RegistryError::Validation("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                RegistryError::Transport {
                    status: Some(503),
                    message: "x".into(),
                    retryable: true,
                },
                StatusCode::BAD_GATEWAY,
            ),
            (RegistryError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
            (RegistryError::Canceled, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bad_request_response() {
        let response = AppError::BadRequest("missing body".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
