//! Error handling for the Chatdesk CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Chatdesk core error: {0}")]
    Core(#[from] chatdesk_core::ChatdeskError),

    #[error("Authentication error: {0}")]
    Auth(#[from] chatdesk_core::AuthError),

    #[error("Storage error: {0}")]
    Storage(#[from] chatdesk_core::StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not signed in; run `chatdesk login` first")]
    NotSignedIn,

    #[error("Session ended: {0}")]
    SessionEnded(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<crate::config::ConfigError> for CliError {
    fn from(err: crate::config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<chatdesk_core::ConfigError> for CliError {
    fn from(err: chatdesk_core::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}
