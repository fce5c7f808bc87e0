//! Chatdesk CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Built-in defaults
//! - `chatdesk.toml` in the working directory
//! - `~/.chatdesk/config.toml`
//! - Environment variables (`CHATDESK_*`, nested keys separated by `__`,
//!   e.g. `CHATDESK_CLIENT__API_BASE_URL`)
//! - Command line overrides

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use chatdesk_core::ClientConfig;

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Chatdesk CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Service endpoints and connection timing
    pub client: ClientConfig,

    /// Terminal behaviour
    pub cli: CliConfig,

    /// Session store location
    pub storage: StorageConfig,
}

/// CLI-specific configuration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Enable verbose logging output
    pub verbose: bool,

    /// Prompt shown in the interactive chat
    pub prompt: String,

    /// Interval of the connection health check (in seconds)
    pub health_check_interval_secs: u64,

    /// Delay before the chat session first connects (in milliseconds)
    pub initial_connect_delay_ms: u64,

    /// Delay before reconnecting after a connection error (in milliseconds)
    pub error_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `session.json`; platform data dir when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            prompt: "you> ".to_string(),
            health_check_interval_secs: 30,
            initial_connect_delay_ms: 2000,
            error_retry_delay_ms: 3000,
        }
    }
}

impl CliConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn initial_connect_delay(&self) -> Duration {
        Duration::from_millis(self.initial_connect_delay_ms)
    }

    pub fn error_retry_delay(&self) -> Duration {
        Duration::from_millis(self.error_retry_delay_ms)
    }
}

/// Command line values that take precedence over every other layer
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub verbose: Option<bool>,
    pub api_base_url: Option<String>,
    pub realtime_url: Option<String>,
    pub data_dir: Option<String>,
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path on top of the defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()));

        let config: AppConfig = figment.extract().map_err(|e| {
            ConfigError::Loading(format!(
                "Failed to load from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load every layer, then apply command line overrides.
    ///
    /// An explicit `config_file` replaces the two default file locations.
    pub fn load_with_overrides(
        config_file: Option<&Path>,
        overrides: Overrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));

        figment = match config_file {
            Some(path) => figment.merge(Toml::file(path)),
            None => {
                let figment = figment.merge(Toml::file("chatdesk.toml"));
                match Self::default_config_path() {
                    Ok(path) => figment.merge(Toml::file(path)),
                    Err(_) => figment,
                }
            }
        };

        figment = figment.merge(Env::prefixed("CHATDESK_").split("__"));

        if let Some(v) = overrides.verbose {
            figment = figment.merge(("cli.verbose", v));
        }
        if let Some(url) = overrides.api_base_url {
            figment = figment.merge(("client.api_base_url", url));
        }
        if let Some(url) = overrides.realtime_url {
            figment = figment.merge(("client.realtime_url", url));
        }
        if let Some(dir) = overrides.data_dir {
            figment = figment.merge(("storage.data_dir", dir));
        }

        let config: AppConfig = figment
            .extract()
            .map_err(|e| ConfigError::Loading(format!("Failed to load with overrides: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(".chatdesk").join("config.toml"))
            .ok_or_else(|| ConfigError::Environment("No home directory available".to_string()))
    }

    /// Directory of the session store
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join("chatdesk"))
            .unwrap_or_else(|| PathBuf::from(".chatdesk"))
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ConfigError::FileSystem(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = self.to_toml()?;
        std::fs::write(path.as_ref(), toml_string)
            .map_err(|e| ConfigError::FileSystem(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Render as a TOML document
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialization(format!("Failed to serialize config: {}", e)))
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.cli.health_check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Health check interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example_config = AppConfig {
            client: ClientConfig {
                api_base_url: "https://support.example.com/api".to_string(),
                realtime_url: "https://support.example.com".to_string(),
                ..ClientConfig::default()
            },
            storage: StorageConfig {
                data_dir: Some(PathBuf::from("/var/lib/chatdesk")),
            },
            ..Default::default()
        };

        toml::to_string_pretty(&example_config)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("File system error: {0}")]
    FileSystem(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
