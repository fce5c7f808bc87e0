//! Error types for the Chatdesk client core
//!
//! HTTP-facing failures from the token manager are returned to the caller as
//! [`AuthError`]. The realtime client never returns errors from its public
//! methods; [`ConnectionError`], [`MessageError`] and [`RoomError`] travel as
//! event payloads instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ----------------------------------------------------------------------------
// Authentication Errors
// ----------------------------------------------------------------------------

/// Failures of the token manager and its HTTP contract
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server refused the request; the text is surfaced verbatim
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("no refresh token")]
    NoRefreshToken,

    #[error("refresh failed: {reason}")]
    RefreshFailed { reason: String },

    #[error("not authenticated")]
    NotAuthenticated,

    /// The retried request was still refused after a successful refresh
    #[error("access denied after token refresh")]
    Forbidden,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("token storage error: {0}")]
    Storage(#[from] StorageError),
}

// ----------------------------------------------------------------------------
// Realtime Errors (delivered as events)
// ----------------------------------------------------------------------------

/// Handshake failure, timeout or transport drop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("tokens not ready after {attempts} attempts")]
    TokensUnavailable { attempts: u32 },

    #[error("connection timeout after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    #[error("{0}")]
    Handshake(String),

    #[error("transport closed: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Whether the server text points at an invalid or expired token
    pub fn is_auth_related(&self) -> bool {
        match self {
            ConnectionError::Handshake(message) | ConnectionError::Transport(message) => {
                message.contains("Authentication") || message.contains("token")
            }
            _ => false,
        }
    }
}

/// Local or server-reported failure to send a chat message
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{error}")]
pub struct MessageError {
    pub error: String,
}

impl MessageError {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }

    pub fn not_connected() -> Self {
        Self::new("Not connected to server")
    }

    pub fn empty() -> Self {
        Self::new("Message cannot be empty")
    }
}

/// Local or server-reported failure of a room operation
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("{error}")]
pub struct RoomError {
    pub error: String,
}

impl RoomError {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }

    pub fn invalid_name() -> Self {
        Self::new("Invalid room name")
    }

    pub fn not_connected() -> Self {
        Self::new("Not connected to server")
    }
}

// ----------------------------------------------------------------------------
// Infrastructure Errors
// ----------------------------------------------------------------------------

/// Persistent key-value store failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt storage file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Invalid client configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("configuration validation error: {0}")]
    Validation(String),
}

/// Malformed Engine.IO / Socket.IO frames
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type: {0}")]
    UnknownPacketType(char),

    #[error("invalid packet payload: {0}")]
    InvalidPayload(String),
}

// ----------------------------------------------------------------------------
// Unified Error
// ----------------------------------------------------------------------------

/// Umbrella error for the crate
#[derive(Error, Debug)]
pub enum ChatdeskError {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("message error: {0}")]
    Message(#[from] MessageError),

    #[error("room error: {0}")]
    Room(#[from] RoomError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type for Chatdesk operations
pub type Result<T> = std::result::Result<T, ChatdeskError>;
