//! Shared fixtures for the chatdesk-core integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatdesk_core::transport::{self, TransportEnd};
use chatdesk_core::{
    AuthError, ClientConfig, ConnectionStatus, EventKind, OutboundCommand, RealtimeClient,
    RealtimeEvent, SocketChannel, TokenSource, Transport, TransportEvent,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// Transport that hands every opened socket to the test
pub struct MockTransport {
    opened: mpsc::UnboundedSender<MockSocket>,
    open_count: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened: tx,
                open_count: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn open(&self, _url: &Url, token: &str) -> SocketChannel {
        let (channel, end) = transport::channel();
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let _ = self.opened.send(MockSocket {
            token: token.to_string(),
            end,
        });
        channel
    }
}

/// Server side of one socket opened by the client
pub struct MockSocket {
    pub token: String,
    end: TransportEnd,
}

impl MockSocket {
    /// Complete the handshake
    pub fn accept(&self) -> bool {
        self.end.set_live(true);
        self.end.report(TransportEvent::Connected {
            sid: Some("sid-test".to_string()),
        })
    }

    /// Refuse the handshake with a server message
    pub fn refuse(&self, message: &str) -> bool {
        self.end.report(TransportEvent::ConnectError(message.to_string()))
    }

    /// Push a server event
    pub fn push(&self, event: &str, data: Value) -> bool {
        self.end.report(TransportEvent::Inbound {
            event: event.to_string(),
            data,
        })
    }

    /// Drop an established connection
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.end.set_live(false);
        self.end
            .report(TransportEvent::Disconnected(reason.to_string()))
    }

    /// Next command already sent by the client, if any
    pub fn try_command(&mut self) -> Option<OutboundCommand> {
        self.end.outbound.try_recv().ok()
    }

    /// All commands sent so far
    pub fn drain_commands(&mut self) -> Vec<OutboundCommand> {
        std::iter::from_fn(|| self.try_command()).collect()
    }
}

// ----------------------------------------------------------------------------
// Fake Token Source
// ----------------------------------------------------------------------------

/// Token source with scripted readiness and refresh outcomes
pub struct FakeTokens {
    /// Poll number (1-based) on which tokens become ready; 0 means never
    ready_on_poll: u32,
    polls: AtomicU32,
    refreshes: AtomicU32,
    refresh_succeeds: bool,
    invalidated: AtomicBool,
    token: Mutex<String>,
}

impl FakeTokens {
    pub fn ready() -> Arc<Self> {
        Self::ready_on(1)
    }

    pub fn ready_on(poll: u32) -> Arc<Self> {
        Arc::new(Self::build(poll, true))
    }

    pub fn never_ready() -> Arc<Self> {
        Arc::new(Self::build(0, true))
    }

    pub fn with_failing_refresh() -> Arc<Self> {
        Arc::new(Self::build(1, false))
    }

    fn build(ready_on_poll: u32, refresh_succeeds: bool) -> Self {
        Self {
            ready_on_poll,
            polls: AtomicU32::new(0),
            refreshes: AtomicU32::new(0),
            refresh_succeeds,
            invalidated: AtomicBool::new(false),
            token: Mutex::new("access-0".to_string()),
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for FakeTokens {
    fn tokens_ready(&self) -> bool {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        !self.is_invalidated() && self.ready_on_poll != 0 && poll >= self.ready_on_poll
    }

    fn access_token(&self) -> Option<String> {
        if self.is_invalidated() {
            None
        } else {
            Some(self.token.lock().clone())
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refresh_succeeds {
            *self.token.lock() = format!("access-{}", n);
            Ok(())
        } else {
            Err(AuthError::RefreshFailed {
                reason: "Invalid refresh token".to_string(),
            })
        }
    }

    async fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------------------
// Event Recording
// ----------------------------------------------------------------------------

pub const ALL_KINDS: [EventKind; 17] = [
    EventKind::StatusChange,
    EventKind::Authenticated,
    EventKind::AuthenticationFailed,
    EventKind::ConnectionError,
    EventKind::Disconnected,
    EventKind::NewMessage,
    EventKind::ChatbotResponse,
    EventKind::MessageProcessing,
    EventKind::UserCount,
    EventKind::RoomJoined,
    EventKind::UserJoinedRoom,
    EventKind::UserLeftRoom,
    EventKind::MessageSent,
    EventKind::MessageError,
    EventKind::RoomError,
    EventKind::Pong,
    EventKind::SocketError,
];

/// Every event seen by a client, in delivery order
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RealtimeEvent>>>,
}

impl EventLog {
    pub fn attach(client: &RealtimeClient) -> Self {
        let log = Self::default();
        for kind in ALL_KINDS {
            let events = Arc::clone(&log.events);
            client.subscribe(kind, move |event| events.lock().push(event.clone()));
        }
        log
    }

    pub fn all(&self) -> Vec<RealtimeEvent> {
        self.events.lock().clone()
    }

    pub fn of(&self, kind: EventKind) -> Vec<RealtimeEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RealtimeEvent::StatusChange(status) => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

pub fn test_config() -> ClientConfig {
    ClientConfig {
        realtime_url: "http://realtime.test:3001".to_string(),
        ..ClientConfig::default()
    }
}

pub fn client_with(tokens: Arc<FakeTokens>, transport: Arc<MockTransport>) -> RealtimeClient {
    RealtimeClient::new(test_config(), tokens, transport).expect("valid test config")
}

/// Let spawned tasks process everything already queued
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

/// Client connected through a mock socket that completed its handshake
pub async fn connected_client() -> (
    RealtimeClient,
    Arc<FakeTokens>,
    Arc<MockTransport>,
    mpsc::UnboundedReceiver<MockSocket>,
    MockSocket,
    EventLog,
) {
    let tokens = FakeTokens::ready();
    let (transport, mut sockets) = MockTransport::new();
    let client = client_with(Arc::clone(&tokens), Arc::clone(&transport));
    let log = EventLog::attach(&client);

    client.connect();
    let socket = sockets.recv().await.expect("socket opened");
    socket.accept();
    settle().await;
    assert_eq!(client.status(), ConnectionStatus::Connected);

    (client, tokens, transport, sockets, socket, log)
}

pub const SECOND: Duration = Duration::from_secs(1);
