//! Transport abstraction for the realtime client
//!
//! A [`Transport`] opens one streaming connection per call and hands back a
//! [`SocketChannel`]. The handshake runs in the background; its outcome and
//! everything after it arrive on the channel as [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use url::Url;

use crate::models::OutgoingMessage;

// ----------------------------------------------------------------------------
// Outbound Traffic
// ----------------------------------------------------------------------------

/// Client-originated events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEmit {
    SendMessage(OutgoingMessage),
    JoinRoom(String),
    LeaveRoom(String),
    Ping,
}

impl ClientEmit {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEmit::SendMessage(_) => "sendMessage",
            ClientEmit::JoinRoom(_) => "joinRoom",
            ClientEmit::LeaveRoom(_) => "leaveRoom",
            ClientEmit::Ping => "ping",
        }
    }

    /// Event arguments as sent on the wire
    pub fn args(&self) -> Vec<Value> {
        match self {
            ClientEmit::SendMessage(message) => vec![json!(message)],
            ClientEmit::JoinRoom(room) | ClientEmit::LeaveRoom(room) => vec![json!(room)],
            ClientEmit::Ping => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    Emit(ClientEmit),
    /// Close the connection without reporting it back
    Close,
}

// ----------------------------------------------------------------------------
// Inbound Traffic
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake accepted
    Connected { sid: Option<String> },
    /// Handshake refused or never completed
    ConnectError(String),
    /// An established connection dropped
    Disconnected(String),
    /// Server-pushed event
    Inbound { event: String, data: Value },
}

// ----------------------------------------------------------------------------
// Channel
// ----------------------------------------------------------------------------

/// Client side of an open connection
#[derive(Debug)]
pub struct SocketChannel {
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub outbound: mpsc::UnboundedSender<OutboundCommand>,
    liveness: Arc<AtomicBool>,
}

impl SocketChannel {
    /// Whether the transport currently holds an established connection
    pub fn is_live(&self) -> bool {
        self.liveness.load(Ordering::Acquire)
    }

    /// Shared liveness flag, readable after the channel is split up
    pub fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.liveness)
    }
}

/// Transport side of an open connection
#[derive(Debug)]
pub struct TransportEnd {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub outbound: mpsc::UnboundedReceiver<OutboundCommand>,
    liveness: Arc<AtomicBool>,
}

impl TransportEnd {
    pub fn set_live(&self, live: bool) {
        self.liveness.store(live, Ordering::Release);
    }

    /// Report an event to the client; false once the client went away
    pub fn report(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

/// Create the two connected halves of a socket channel
pub fn channel() -> (SocketChannel, TransportEnd) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let liveness = Arc::new(AtomicBool::new(false));

    (
        SocketChannel {
            events: event_rx,
            outbound: outbound_tx,
            liveness: Arc::clone(&liveness),
        },
        TransportEnd {
            events: event_tx,
            outbound: outbound_rx,
            liveness,
        },
    )
}

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Opens authenticated streaming connections
///
/// Implementations must not reconnect on their own; a dropped connection is
/// reported once as [`TransportEvent::Disconnected`] and the channel ends.
pub trait Transport: Send + Sync {
    /// Start connecting to `url` with `token` as connection-time auth
    ///
    /// Must be called from within a tokio runtime and return without waiting
    /// for the handshake.
    fn open(&self, url: &Url, token: &str) -> SocketChannel;
}
