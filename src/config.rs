//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default cadence of the background session poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Default per-request HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often the poll scheduler ticks while awaiting the assistant.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ControllerConfig {
    /// Load from `ONBOARDING_POLL_INTERVAL_MS`, falling back to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let poll_interval = match std::env::var("ONBOARDING_POLL_INTERVAL_MS") {
            Ok(raw) => Duration::from_millis(parse_positive("ONBOARDING_POLL_INTERVAL_MS", &raw)?),
            Err(_) => DEFAULT_POLL_INTERVAL,
        };
        Ok(Self { poll_interval })
    }
}

/// Connection settings for the HTTP onboarding API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `http://localhost:8000`. No trailing slash required.
    pub base_url: String,
    /// Bearer token sent with every request, if set.
    pub token: Option<SecretString>,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretString::from(token.into()));
        self
    }

    /// Load from environment variables.
    ///
    /// `ONBOARDING_API_URL` is required; `ONBOARDING_API_TOKEN` and
    /// `ONBOARDING_HTTP_TIMEOUT_SECS` are optional.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("ONBOARDING_API_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ONBOARDING_API_URL".to_string()))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARDING_API_URL".to_string(),
                message: format!("expected an http(s) URL, got {base_url:?}"),
            });
        }

        let token = std::env::var("ONBOARDING_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        let timeout = match std::env::var("ONBOARDING_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(parse_positive("ONBOARDING_HTTP_TIMEOUT_SECS", &raw)?),
            Err(_) => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(Self {
            base_url,
            token,
            timeout,
        })
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}
