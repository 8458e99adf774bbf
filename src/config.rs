use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::registry::retry::RetryPolicy;
use crate::registry::token::TokenSettings;

#[derive(Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub cartorio_base_url: String,
    pub cartorio_client_id: String,
    pub cartorio_client_secret: String,
    /// Token lifetime assumed when the registry does not report one.
    pub token_ttl_secs: u64,
    /// Refresh the token this many seconds before it expires.
    pub token_margin_secs: u64,
    /// Overall deadline for one logical request, retries included.
    pub request_timeout_secs: u64,
    /// Deadline for a single HTTP attempt.
    pub attempt_timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("cartorio_base_url", &self.cartorio_base_url)
            .field("cartorio_client_id", &self.cartorio_client_id)
            .field("cartorio_client_secret", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("token_margin_secs", &self.token_margin_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_ms", &self.retry_base_ms)
            .field("retry_max_ms", &self.retry_max_ms)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: parse_or("PORT", 3000)
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            cartorio_base_url: std::env::var("CARTORIO_BASE_URL")
                .map_err(|_| anyhow::anyhow!("CARTORIO_BASE_URL environment variable required"))
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("CARTORIO_BASE_URL cannot be empty");
                    }
                    if !url.starts_with("http://") && !url.starts_with("https://") {
                        anyhow::bail!("CARTORIO_BASE_URL must start with http:// or https://");
                    }
                    Ok(url)
                })?,
            cartorio_client_id: std::env::var("CARTORIO_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("CARTORIO_CLIENT_ID environment variable required"))
                .and_then(|id| {
                    if id.trim().is_empty() {
                        anyhow::bail!("CARTORIO_CLIENT_ID cannot be empty");
                    }
                    Ok(id)
                })?,
            cartorio_client_secret: std::env::var("CARTORIO_CLIENT_SECRET")
                .map_err(|_| {
                    anyhow::anyhow!("CARTORIO_CLIENT_SECRET environment variable required")
                })
                .and_then(|secret| {
                    if secret.trim().is_empty() {
                        anyhow::bail!("CARTORIO_CLIENT_SECRET cannot be empty");
                    }
                    Ok(secret)
                })?,
            token_ttl_secs: parse_or("CARTORIO_TOKEN_TTL_SECS", 3600)?,
            token_margin_secs: parse_or("CARTORIO_TOKEN_MARGIN_SECS", 30)?,
            request_timeout_secs: parse_or("CARTORIO_REQUEST_TIMEOUT_SECS", 30)?,
            attempt_timeout_secs: parse_or("CARTORIO_ATTEMPT_TIMEOUT_SECS", 10)?,
            max_attempts: parse_or("CARTORIO_MAX_ATTEMPTS", 3)?,
            retry_base_ms: parse_or("CARTORIO_RETRY_BASE_MS", 200)?,
            retry_max_ms: parse_or("CARTORIO_RETRY_MAX_MS", 5000)?,
        };
        config.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Cartório Base URL: {}", config.cartorio_base_url);
        tracing::debug!(
            "Token TTL {}s (margin {}s), request timeout {}s, {} attempt(s)",
            config.token_ttl_secs,
            config.token_margin_secs,
            config.request_timeout_secs,
            config.max_attempts
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Cross-field checks that a single variable cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_ttl_secs == 0 {
            anyhow::bail!("CARTORIO_TOKEN_TTL_SECS must be greater than zero");
        }
        if self.token_margin_secs >= self.token_ttl_secs {
            anyhow::bail!("CARTORIO_TOKEN_MARGIN_SECS must be smaller than CARTORIO_TOKEN_TTL_SECS");
        }
        if self.request_timeout_secs == 0 || self.attempt_timeout_secs == 0 {
            anyhow::bail!("Registry timeouts must be greater than zero");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("CARTORIO_MAX_ATTEMPTS must be at least 1");
        }
        if self.retry_base_ms > self.retry_max_ms {
            anyhow::bail!("CARTORIO_RETRY_BASE_MS cannot exceed CARTORIO_RETRY_MAX_MS");
        }
        Ok(())
    }

    pub fn token_settings(&self) -> TokenSettings {
        TokenSettings {
            refresh_margin: Duration::from_secs(self.token_margin_secs),
            default_ttl: Duration::from_secs(self.token_ttl_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a valid number, got {:?}", name, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            port: 3000,
            cartorio_base_url: "https://cartorio.example.com/api/v1".to_string(),
            cartorio_client_id: "client".to_string(),
            cartorio_client_secret: "secret".to_string(),
            token_ttl_secs: 3600,
            token_margin_secs: 30,
            request_timeout_secs: 30,
            attempt_timeout_secs: 10,
            max_attempts: 3,
            retry_base_ms: 200,
            retry_max_ms: 5000,
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.token_settings().refresh_margin, Duration::from_secs(30));
        assert_eq!(config.retry_policy().max_attempts(), 3);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_margin_must_be_below_ttl() {
        let config = Config {
            token_margin_secs: 3600,
            ..sample()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_bounds_are_checked() {
        let config = Config {
            retry_base_ms: 10_000,
            ..sample()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_attempts: 0,
            ..sample()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_client_secret() {
        let config = Config {
            cartorio_client_secret: "s3cr3t-value".to_string(),
            ..sample()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cr3t-value"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains(&config.cartorio_client_id));
    }
}
