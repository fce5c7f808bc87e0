//! Chatdesk client core
//!
//! Two collaborating components back the Chatdesk support chat:
//!
//! - [`TokenManager`] owns the access/refresh credential pair, persists it
//!   through an injected [`KeyValueStore`] and refreshes it transparently on
//!   a 403 during authenticated HTTP calls.
//! - [`RealtimeClient`] supervises one authenticated Socket.IO connection,
//!   tracks its [`ConnectionStatus`] and fans server events out to typed
//!   listeners.
//!
//! Both are explicit handles constructed once at process start and passed to
//! whoever needs them.

pub mod auth;
pub mod backoff;
pub mod claims;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod realtime;
pub mod socketio;
pub mod storage;
pub mod tokens;
pub mod transport;
pub mod wire;

pub use auth::{TokenManager, TokenSource};
pub use backoff::{RetryPolicy, RetryState};
pub use claims::TokenClaims;
pub use config::ClientConfig;
pub use error::{
    AuthError, ChatdeskError, ConfigError, ConnectionError, MessageError, ProtocolError, Result,
    RoomError, StorageError,
};
pub use events::{ConnectionStatus, EventKind, Listener, RealtimeEvent, SubscriptionId};
pub use models::{AuthSession, ChatMessage, MessageId, MessageMetadata, Sender, User, UserCount};
pub use realtime::RealtimeClient;
pub use socketio::SocketIoTransport;
pub use storage::{FileStore, KeyValueStore, MemoryStore};
pub use tokens::{preview_token, CredentialPair};
pub use transport::{ClientEmit, OutboundCommand, SocketChannel, Transport, TransportEvent};
