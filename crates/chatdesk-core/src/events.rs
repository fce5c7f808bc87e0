//! Typed publish/subscribe fan-out for realtime events
//!
//! Listeners are registered per [`EventKind`] and removed through the
//! [`SubscriptionId`] returned at registration. Emission takes a snapshot of
//! the listeners so callbacks are free to subscribe, unsubscribe or call back
//! into the client.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::error::{ConnectionError, MessageError, ProtocolError, RoomError};
use crate::models::{ChatMessage, UserCount};

// ----------------------------------------------------------------------------
// Connection Status
// ----------------------------------------------------------------------------

/// Connectivity of the realtime client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Event Kinds and Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChange,
    Authenticated,
    AuthenticationFailed,
    ConnectionError,
    Disconnected,
    NewMessage,
    ChatbotResponse,
    MessageProcessing,
    UserCount,
    RoomJoined,
    UserJoinedRoom,
    UserLeftRoom,
    MessageSent,
    MessageError,
    RoomError,
    Pong,
    SocketError,
}

impl EventKind {
    /// Event name as used on the wire and by listeners
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StatusChange => "statusChange",
            EventKind::Authenticated => "authenticated",
            EventKind::AuthenticationFailed => "authenticationFailed",
            EventKind::ConnectionError => "connectionError",
            EventKind::Disconnected => "disconnected",
            EventKind::NewMessage => "newMessage",
            EventKind::ChatbotResponse => "chatbotResponse",
            EventKind::MessageProcessing => "messageProcessing",
            EventKind::UserCount => "userCount",
            EventKind::RoomJoined => "roomJoined",
            EventKind::UserJoinedRoom => "userJoinedRoom",
            EventKind::UserLeftRoom => "userLeftRoom",
            EventKind::MessageSent => "messageSent",
            EventKind::MessageError => "messageError",
            EventKind::RoomError => "roomError",
            EventKind::Pong => "pong",
            EventKind::SocketError => "socketError",
        }
    }

    /// Kind for an event name pushed by the server
    ///
    /// Lifecycle kinds (`statusChange`, `connectionError`, ...) are produced
    /// locally and are not accepted from the server.
    pub fn from_server_event(name: &str) -> Option<Self> {
        let kind = match name {
            "authenticated" => EventKind::Authenticated,
            "newMessage" => EventKind::NewMessage,
            "chatbotResponse" => EventKind::ChatbotResponse,
            "messageProcessing" => EventKind::MessageProcessing,
            "userCount" => EventKind::UserCount,
            "roomJoined" => EventKind::RoomJoined,
            "userJoinedRoom" => EventKind::UserJoinedRoom,
            "userLeftRoom" => EventKind::UserLeftRoom,
            "messageSent" => EventKind::MessageSent,
            "messageError" => EventKind::MessageError,
            "roomError" => EventKind::RoomError,
            "pong" => EventKind::Pong,
            "socketError" => EventKind::SocketError,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event delivered to listeners
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    StatusChange(ConnectionStatus),
    Authenticated(Value),
    /// Token refresh failed during the connection; the session is gone
    AuthenticationFailed(String),
    ConnectionError(ConnectionError),
    Disconnected(String),
    NewMessage(ChatMessage),
    ChatbotResponse(ChatMessage),
    MessageProcessing(Value),
    UserCount(UserCount),
    RoomJoined(Value),
    UserJoinedRoom(Value),
    UserLeftRoom(Value),
    MessageSent(Value),
    MessageError(MessageError),
    RoomError(RoomError),
    Pong(Value),
    SocketError(Value),
}

impl RealtimeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RealtimeEvent::StatusChange(_) => EventKind::StatusChange,
            RealtimeEvent::Authenticated(_) => EventKind::Authenticated,
            RealtimeEvent::AuthenticationFailed(_) => EventKind::AuthenticationFailed,
            RealtimeEvent::ConnectionError(_) => EventKind::ConnectionError,
            RealtimeEvent::Disconnected(_) => EventKind::Disconnected,
            RealtimeEvent::NewMessage(_) => EventKind::NewMessage,
            RealtimeEvent::ChatbotResponse(_) => EventKind::ChatbotResponse,
            RealtimeEvent::MessageProcessing(_) => EventKind::MessageProcessing,
            RealtimeEvent::UserCount(_) => EventKind::UserCount,
            RealtimeEvent::RoomJoined(_) => EventKind::RoomJoined,
            RealtimeEvent::UserJoinedRoom(_) => EventKind::UserJoinedRoom,
            RealtimeEvent::UserLeftRoom(_) => EventKind::UserLeftRoom,
            RealtimeEvent::MessageSent(_) => EventKind::MessageSent,
            RealtimeEvent::MessageError(_) => EventKind::MessageError,
            RealtimeEvent::RoomError(_) => EventKind::RoomError,
            RealtimeEvent::Pong(_) => EventKind::Pong,
            RealtimeEvent::SocketError(_) => EventKind::SocketError,
        }
    }

    /// Build an event from a server push
    ///
    /// Returns `Ok(None)` for event names the client does not relay.
    pub fn from_server(name: &str, data: Value) -> Result<Option<Self>, ProtocolError> {
        let Some(kind) = EventKind::from_server_event(name) else {
            return Ok(None);
        };

        let event = match kind {
            EventKind::Authenticated => RealtimeEvent::Authenticated(data),
            EventKind::NewMessage => RealtimeEvent::NewMessage(typed(name, data)?),
            EventKind::ChatbotResponse => RealtimeEvent::ChatbotResponse(typed(name, data)?),
            EventKind::MessageProcessing => RealtimeEvent::MessageProcessing(data),
            EventKind::UserCount => RealtimeEvent::UserCount(typed(name, data)?),
            EventKind::RoomJoined => RealtimeEvent::RoomJoined(data),
            EventKind::UserJoinedRoom => RealtimeEvent::UserJoinedRoom(data),
            EventKind::UserLeftRoom => RealtimeEvent::UserLeftRoom(data),
            EventKind::MessageSent => RealtimeEvent::MessageSent(data),
            EventKind::MessageError => RealtimeEvent::MessageError(MessageError::new(error_text(&data))),
            EventKind::RoomError => RealtimeEvent::RoomError(RoomError::new(error_text(&data))),
            EventKind::Pong => RealtimeEvent::Pong(data),
            EventKind::SocketError => RealtimeEvent::SocketError(data),
            EventKind::StatusChange
            | EventKind::AuthenticationFailed
            | EventKind::ConnectionError
            | EventKind::Disconnected => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn typed<T: serde::de::DeserializeOwned>(name: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| ProtocolError::InvalidPayload(format!("{}: {}", name, e)))
}

/// Error text from `{error: "..."}`, a bare string, or anything else
fn error_text(data: &Value) -> String {
    match data {
        Value::String(text) => text.clone(),
        Value::Object(map) => match map.get("error").or_else(|| map.get("message")) {
            Some(Value::String(text)) => text.clone(),
            _ => data.to_string(),
        },
        _ => data.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Listener Registry
// ----------------------------------------------------------------------------

/// Callback invoked for every event of the kind it was registered under
pub type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

/// Token identifying one registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Mapping from event kind to its registered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: HashMap<EventKind, Vec<(SubscriptionId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` under `kind`
    ///
    /// Registering the same listener twice for one kind has no extra effect
    /// and yields the existing id.
    pub fn subscribe(&mut self, kind: EventKind, listener: Listener) -> SubscriptionId {
        let entries = self.listeners.entry(kind).or_default();
        if let Some((id, _)) = entries.iter().find(|(_, l)| same_listener(l, &listener)) {
            return *id;
        }

        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        entries.push((id, listener));
        id
    }

    /// Remove one registration; false if it was already gone
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for entries in self.listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(entry_id, _)| *entry_id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove `listener` from `kind` by identity
    pub fn remove_listener(&mut self, kind: EventKind, listener: &Listener) -> bool {
        match self.listeners.get_mut(&kind) {
            Some(entries) => {
                let before = entries.len();
                entries.retain(|(_, l)| !same_listener(l, listener));
                entries.len() != before
            }
            None => false,
        }
    }

    /// Snapshot of the listeners for `kind`, in registration order
    pub fn listeners_for(&self, kind: EventKind) -> Vec<Listener> {
        self.listeners
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<_> = self
            .listeners
            .iter()
            .map(|(kind, entries)| (kind.as_str(), entries.len()))
            .collect();
        f.debug_struct("ListenerRegistry").field("listeners", &counts).finish()
    }
}

/// Invoke each listener independently
///
/// A panicking listener is logged and skipped; the remaining listeners still
/// run.
pub fn dispatch(listeners: &[Listener], event: &RealtimeEvent) {
    for listener in listeners {
        let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)));
        if outcome.is_err() {
            error!("Error in event listener for {}", event.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting() -> (Listener, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let listener: Listener = Arc::new(move |_event: &RealtimeEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (listener, hits)
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let mut registry = ListenerRegistry::new();
        let (listener, hits) = counting();

        let first = registry.subscribe(EventKind::Pong, listener.clone());
        let second = registry.subscribe(EventKind::Pong, listener.clone());
        assert_eq!(first, second);
        assert_eq!(registry.count(EventKind::Pong), 1);

        dispatch(&registry.listeners_for(EventKind::Pong), &RealtimeEvent::Pong(Value::Null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_and_remove() {
        let mut registry = ListenerRegistry::new();
        let (a, _) = counting();
        let (b, _) = counting();

        let id_a = registry.subscribe(EventKind::NewMessage, a);
        registry.subscribe(EventKind::NewMessage, b.clone());
        registry.subscribe(EventKind::UserCount, b.clone());

        assert!(registry.unsubscribe(id_a));
        assert!(!registry.unsubscribe(id_a));
        assert!(registry.remove_listener(EventKind::NewMessage, &b));
        assert_eq!(registry.count(EventKind::NewMessage), 0);
        assert_eq!(registry.count(EventKind::UserCount), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (good, hits) = counting();
        let bad: Listener = Arc::new(|_event: &RealtimeEvent| panic!("listener failure"));

        dispatch(&[bad, good], &RealtimeEvent::StatusChange(ConnectionStatus::Connected));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_server_events() {
        let event = RealtimeEvent::from_server("userCount", json!({"count": 3, "timestamp": "t"}))
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::UserCount);

        let event = RealtimeEvent::from_server("messageError", json!({"error": "Rate limited"}))
            .unwrap()
            .unwrap();
        assert_eq!(event, RealtimeEvent::MessageError(MessageError::new("Rate limited")));

        // Lifecycle names are never accepted from the server
        assert!(RealtimeEvent::from_server("statusChange", json!("connected"))
            .unwrap()
            .is_none());
        assert!(RealtimeEvent::from_server("userCount", json!({"nope": 1})).is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ConnectionStatus::Error).unwrap(), json!("error"));
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }
}
