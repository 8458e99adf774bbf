//! Error taxonomy for the registry client and the normalizer that maps raw
//! upstream failures (HTTP status, error bodies, reqwest errors) into it.
//!
//! Services never branch on status codes themselves; everything that is not a
//! successful, well-formed response passes through this module.

use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;

/// Longest raw body fragment kept in an error message.
const MAX_RAW_MESSAGE_LEN: usize = 500;

/// Body fields, in priority order, that carry a human readable message.
const MESSAGE_FIELDS: [&str; 7] = [
    "mensagem",
    "message",
    "erro",
    "error",
    "detail",
    "title",
    "descricao",
];

/// Body fields holding a list of validation messages.
const MESSAGE_LIST_FIELDS: [&str; 2] = ["erros", "errors"];

/// Failure kinds surfaced by every registry operation.
///
/// The type is `Clone` so a single failed authentication can be handed to
/// every caller waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Credentials rejected or authentication service unreachable.
    Auth(String),
    /// The referenced hash does not exist upstream.
    NotFound(String),
    /// Operation forbidden by the current upstream state.
    Conflict(String),
    /// Malformed or semantically invalid request; upstream message preserved.
    Validation(String),
    /// Network-level failure, 5xx, or an unexpected response shape.
    Transport {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },
    /// Overall deadline exceeded.
    Timeout(String),
    /// Caller cancelled the operation.
    Canceled,
}

/// Coarse classification used by the route layer and by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Conflict,
    Validation,
    Transport,
    Timeout,
    Canceled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
        }
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::Auth(_) => ErrorKind::Auth,
            RegistryError::NotFound(_) => ErrorKind::NotFound,
            RegistryError::Conflict(_) => ErrorKind::Conflict,
            RegistryError::Validation(_) => ErrorKind::Validation,
            RegistryError::Transport { .. } => ErrorKind::Transport,
            RegistryError::Timeout(_) => ErrorKind::Timeout,
            RegistryError::Canceled => ErrorKind::Canceled,
        }
    }

    /// Whether the transport retry policy may replay the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Transport {
                retryable: true,
                ..
            }
        )
    }

    /// The message carried by the error, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            RegistryError::Auth(msg)
            | RegistryError::NotFound(msg)
            | RegistryError::Conflict(msg)
            | RegistryError::Validation(msg)
            | RegistryError::Timeout(msg) => msg,
            RegistryError::Transport { message, .. } => message,
            RegistryError::Canceled => "operation canceled",
        }
    }

    /// Response that could not be decoded into the expected shape.
    pub fn unexpected_shape(context: &str, detail: impl fmt::Display) -> Self {
        RegistryError::Transport {
            status: None,
            message: format!("Unexpected {} response shape: {}", context, detail),
            retryable: false,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Auth(msg) => write!(f, "Authentication failed: {}", msg),
            RegistryError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RegistryError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            RegistryError::Validation(msg) => write!(f, "Validation error: {}", msg),
            RegistryError::Transport {
                status: Some(status),
                message,
                ..
            } => write!(f, "Registry transport error ({}): {}", status, message),
            RegistryError::Transport { message, .. } => {
                write!(f, "Registry transport error: {}", message)
            }
            RegistryError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            RegistryError::Canceled => write!(f, "Operation canceled"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Maps a non-2xx upstream response into the taxonomy.
///
/// 401 is mapped to `Auth` here; the transport intercepts it first to run the
/// single re-authentication, so this branch is only reached once that replay
/// has been spent.
pub fn normalize_status(status: StatusCode, body: &str) -> RegistryError {
    let message = extract_message(body).unwrap_or_else(|| fallback_message(status));
    let code = status.as_u16();

    match code {
        401 | 403 => RegistryError::Auth(message),
        404 | 410 => RegistryError::NotFound(message),
        409 | 412 | 423 => RegistryError::Conflict(message),
        408 | 429 => RegistryError::Transport {
            status: Some(code),
            message,
            retryable: true,
        },
        400..=499 => RegistryError::Validation(message),
        500..=599 => RegistryError::Transport {
            status: Some(code),
            message,
            retryable: true,
        },
        _ => RegistryError::Transport {
            status: Some(code),
            message,
            retryable: false,
        },
    }
}

/// Maps a reqwest failure (connect, timeout, body read) into the taxonomy.
///
/// Per-attempt timeouts are transient transport failures; the overall
/// deadline is enforced separately and reported as `Timeout`.
pub fn normalize_reqwest(err: &reqwest::Error) -> RegistryError {
    if err.is_decode() {
        return RegistryError::unexpected_shape("registry", err);
    }
    if err.is_builder() {
        return RegistryError::Transport {
            status: None,
            message: format!("Failed to build registry request: {}", err),
            retryable: false,
        };
    }
    let message = if err.is_timeout() {
        format!("Registry request attempt timed out: {}", err)
    } else if err.is_connect() {
        format!("Registry connection failed: {}", err)
    } else {
        format!("Registry request failed: {}", err)
    };
    RegistryError::Transport {
        status: err.status().map(|s| s.as_u16()),
        message,
        retryable: true,
    }
}

/// Pulls the upstream's own message out of an error body, when it has one.
pub fn extract_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => message_from_json(&value),
        Err(_) => Some(truncate(trimmed)),
    }
}

fn message_from_json(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(truncate(s.trim())),
        Value::Object(map) => {
            for field in MESSAGE_FIELDS {
                match map.get(field) {
                    Some(Value::String(s)) if !s.trim().is_empty() => {
                        return Some(truncate(s.trim()))
                    }
                    Some(nested @ Value::Object(_)) => {
                        if let Some(msg) = message_from_json(nested) {
                            return Some(msg);
                        }
                    }
                    _ => {}
                }
            }
            for field in MESSAGE_LIST_FIELDS {
                if let Some(Value::Array(items)) = map.get(field) {
                    let joined = items
                        .iter()
                        .filter_map(message_from_json)
                        .collect::<Vec<_>>()
                        .join("; ");
                    if !joined.is_empty() {
                        return Some(truncate(&joined));
                    }
                }
            }
            None
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .filter_map(message_from_json)
                .collect::<Vec<_>>()
                .join("; ");
            (!joined.is_empty()).then(|| truncate(&joined))
        }
        _ => None,
    }
}

fn fallback_message(status: StatusCode) -> String {
    format!(
        "Registry returned status {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    )
    .trim_end()
    .to_string()
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_RAW_MESSAGE_LEN {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_RAW_MESSAGE_LEN).collect();
    cut.push('…');
    cut
}
