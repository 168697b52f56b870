//! Transport configuration.

use crud_saga_core::error::SagaError;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// Environment variable overriding [`TransportConfig::base_url`].
pub const BASE_URL_ENV: &str = "CRUD_SAGA_BASE_URL";

/// Environment variable overriding [`TransportConfig::timeout`], in milliseconds.
pub const TIMEOUT_ENV: &str = "CRUD_SAGA_TIMEOUT_MS";

/// Default base address.
pub const DEFAULT_BASE_URL: &str = "http://localhost";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Configuration of one transport instance.
///
/// Caller headers are merged over the baseline `Content-Type: application/json`.
///
/// # Example
///
/// ```
/// use crud_saga_api::TransportConfig;
/// use std::time::Duration;
///
/// let config = TransportConfig::default()
///     .with_base_url("https://api.example.com")
///     .with_timeout(Duration::from_secs(2))
///     .with_header("X-Client", "docs");
/// assert_eq!(config.timeout, Duration::from_secs(2));
///
/// let parsed: TransportConfig =
///     serde_json::from_str(r#"{"base_url": "https://api.example.com", "timeout_ms": 750}"#)
///         .unwrap();
/// assert_eq!(parsed.timeout, Duration::from_millis(750));
/// assert!(parsed.headers.is_empty());
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base address every request path is appended to
    pub base_url: String,

    /// Per-request timeout
    #[serde(rename = "timeout_ms", deserialize_with = "millis")]
    pub timeout: Duration,

    /// Static headers sent with every request
    pub headers: BTreeMap<String, String>,
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            headers: BTreeMap::new(),
        }
    }
}

impl TransportConfig {
    /// Defaults overridden by `CRUD_SAGA_BASE_URL` and `CRUD_SAGA_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if the timeout is not a number.
    pub fn from_env() -> Result<Self, SagaError> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            config.base_url = base_url;
        }

        if let Ok(timeout) = std::env::var(TIMEOUT_ENV) {
            let ms = timeout.trim().parse::<u64>().map_err(|e| {
                SagaError::invalid(format!("{TIMEOUT_ENV} must be milliseconds: {e}"))
            })?;
            config.timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Set the base address.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a static header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}
