//! API token resolution and client configuration.

use std::time::Duration;

use url::Url;

use crate::providers::ProviderError;

/// Environment variables consulted for the API token, highest priority first.
pub const TOKEN_ENV_VARS: [&str; 3] = ["METAL_API_TOKEN", "PACKET_API_TOKEN", "PACKET_TOKEN"];

/// Default Equinix Metal API endpoint.
pub const DEFAULT_API_URL: &str = "https://api.equinix.com/metal/v1";

/// Default timeout for a single API request.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default interval between re-list calls while waiting for convergence.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default wall-clock limit for convergence waits.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 900;

/// Resolve the API token.
///
/// A non-empty `explicit` token wins. Otherwise the first non-empty value
/// in `env` is used, in the order given. Empty strings count as unset.
#[must_use]
pub fn resolve_api_token(explicit: Option<&str>, env: &[(&str, Option<String>)]) -> Option<String> {
    if let Some(token) = explicit.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    env.iter()
        .filter_map(|(_, value)| value.as_deref())
        .find(|value| !value.is_empty())
        .map(ToString::to_string)
}

/// Snapshot the given environment variables, preserving their order.
#[must_use]
pub fn env_lookup<'a>(names: &[&'a str]) -> Vec<(&'a str, Option<String>)> {
    names
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect()
}

/// Connection settings for the API client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API token sent as `X-Auth-Token`.
    pub api_token: String,
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Optional consumer token sent as `X-Consumer-Token`.
    pub consumer_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Build a configuration from an already-resolved token.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] if the token is missing or empty.
    pub fn new(api_token: Option<String>) -> Result<Self, ProviderError> {
        let api_token = api_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            ProviderError::Config(format!(
                "missing required argument: api_token (or set one of {})",
                TOKEN_ENV_VARS.join(", ")
            ))
        })?;

        Ok(Self {
            api_token,
            base_url: DEFAULT_API_URL.to_string(),
            consumer_token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        })
    }

    /// Point the client at a different API endpoint.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] if `url` is not an absolute URL.
    pub fn with_base_url(mut self, url: &str) -> Result<Self, ProviderError> {
        Url::parse(url).map_err(|e| ProviderError::Config(format!("invalid API URL {url}: {e}")))?;
        self.base_url = url.trim_end_matches('/').to_string();
        Ok(self)
    }

    /// Attach a consumer token.
    #[must_use]
    pub fn with_consumer_token(mut self, token: impl Into<String>) -> Self {
        self.consumer_token = Some(token.into());
        self
    }

    /// Override the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Polling policy for convergence waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Sleep between re-list calls.
    pub interval: Duration,
    /// Hard wall-clock limit.
    pub timeout: Duration,
}

impl PollConfig {
    /// Default interval with a custom timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(values: [Option<&str>; 3]) -> Vec<(&'static str, Option<String>)> {
        TOKEN_ENV_VARS
            .iter()
            .zip(values)
            .map(|(name, value)| (*name, value.map(String::from)))
            .collect()
    }

    #[test]
    fn test_explicit_token_beats_environment() {
        let env = env([None, None, Some("donotwant")]);
        assert_eq!(
            resolve_api_token(Some("deadbeef"), &env),
            Some("deadbeef".to_string())
        );
    }

    #[test]
    fn test_env_priority_order() {
        let all = env([Some("metal"), Some("packet-api"), Some("packet")]);
        assert_eq!(resolve_api_token(None, &all), Some("metal".to_string()));

        let fallback = env([None, Some("packet-api"), Some("packet")]);
        assert_eq!(
            resolve_api_token(None, &fallback),
            Some("packet-api".to_string())
        );

        let last = env([None, None, Some("packet")]);
        assert_eq!(resolve_api_token(None, &last), Some("packet".to_string()));
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let env = env([Some(""), None, Some("deadbeef")]);
        assert_eq!(resolve_api_token(Some(""), &env), Some("deadbeef".to_string()));
        assert_eq!(resolve_api_token(None, &[]), None);
    }

    #[test]
    fn test_client_config_requires_token() {
        assert!(matches!(
            ClientConfig::new(None),
            Err(ProviderError::Config(_))
        ));
        assert!(ClientConfig::new(Some(String::new())).is_err());

        let config = ClientConfig::new(Some("deadbeef".into())).unwrap();
        assert_eq!(config.base_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_base_url_is_validated_and_trimmed() {
        let config = ClientConfig::new(Some("t".into()))
            .unwrap()
            .with_base_url("http://127.0.0.1:8080/")
            .unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:8080");

        assert!(ClientConfig::new(Some("t".into()))
            .unwrap()
            .with_base_url("not a url")
            .is_err());
    }
}
