//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::backoff::RetryPolicy;
use crate::error::ConfigError;

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Endpoints and timing for the token manager and the realtime client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the authentication service
    pub api_base_url: String,
    /// Base URL of the realtime (Socket.IO) service
    pub realtime_url: String,
    /// Per-request HTTP timeout
    pub request_timeout_ms: u64,
    /// Time allowed for the realtime handshake to complete
    pub connect_timeout_ms: u64,
    /// Token readiness polling before a connection attempt
    pub token_poll: RetryPolicy,
    /// Settle delay between disconnect and connect in a forced reconnect
    pub force_reconnect_delay_ms: u64,
    /// Delay before reconnecting after an auth-triggered token refresh
    pub auth_retry_delay_ms: u64,
    /// Delay before reconnecting with a token refreshed elsewhere
    pub token_swap_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:4000".to_string(),
            realtime_url: "http://localhost:3001".to_string(),
            request_timeout_ms: 10_000,
            connect_timeout_ms: 15_000,
            token_poll: RetryPolicy::default(),
            force_reconnect_delay_ms: 2000,
            auth_retry_delay_ms: 1000,
            token_swap_delay_ms: 500,
        }
    }
}

impl ClientConfig {
    /// Configuration pointing both services at one host, for local development
    pub fn local_development(host: &str) -> Self {
        Self {
            api_base_url: format!("http://{}:4000", host),
            realtime_url: format!("http://{}:3001", host),
            ..Self::default()
        }
    }

    pub fn api_base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_base_url).map_err(|source| ConfigError::InvalidUrl {
            field: "api_base_url",
            source,
        })
    }

    pub fn realtime_base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.realtime_url).map_err(|source| ConfigError::InvalidUrl {
            field: "realtime_url",
            source,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn force_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.force_reconnect_delay_ms)
    }

    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }

    pub fn token_swap_delay(&self) -> Duration {
        Duration::from_millis(self.token_swap_delay_ms)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.api_base()?;
        self.realtime_base()?;

        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Request timeout must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "Connect timeout must be greater than 0".to_string(),
            ));
        }
        if self.token_poll.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "Token poll needs at least one attempt".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.force_reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.token_poll.max_attempts, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ClientConfig::default();
        config.realtime_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "realtime_url", .. })
        ));

        let mut config = ClientConfig::default();
        config.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.token_poll.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_base_url":"https://support.example.com"}"#).unwrap();
        assert_eq!(config.api_base_url, "https://support.example.com");
        assert_eq!(config.realtime_url, "http://localhost:3001");
    }
}
