//! Realtime Connection Manager
//!
//! Supervises a single authenticated streaming connection and fans server
//! events out to typed listeners.
//!
//! ```text
//! Disconnected --connect--> Connecting --handshake--> Connected
//!                               |                        |
//!                  refused / timeout               transport drop
//!                               v                        v
//!                             Error                 Disconnected
//! ```
//!
//! Every teardown advances a generation counter and aborts the task that
//! pumps the old channel, so nothing from a previous socket reaches listeners.
//! Public methods never return errors; failures are delivered as events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::auth::TokenSource;
use crate::config::ClientConfig;
use crate::error::{ConfigError, ConnectionError, MessageError, RoomError};
use crate::events::{
    dispatch, ConnectionStatus, EventKind, Listener, ListenerRegistry, RealtimeEvent,
    SubscriptionId,
};
use crate::models::OutgoingMessage;
use crate::socketio::SocketIoTransport;
use crate::tokens::preview_token;
use crate::transport::{ClientEmit, OutboundCommand, SocketChannel, Transport, TransportEvent};

// ----------------------------------------------------------------------------
// Internal State
// ----------------------------------------------------------------------------

struct ActiveSocket {
    outbound: mpsc::UnboundedSender<OutboundCommand>,
    liveness: Arc<AtomicBool>,
}

impl ActiveSocket {
    fn is_live(&self) -> bool {
        self.liveness.load(Ordering::Acquire)
    }

    fn close(self) {
        let _ = self.outbound.send(OutboundCommand::Close);
    }
}

struct State {
    status: ConnectionStatus,
    generation: u64,
    socket: Option<ActiveSocket>,
    /// Token poll, handshake and event pump of the current attempt
    attempt: Option<JoinHandle<()>>,
    /// Delayed reconnect (settle delay or auth retry)
    scheduled: Option<JoinHandle<()>>,
    /// Whether an auth-type connect error may still trigger a token refresh
    auth_refresh_armed: bool,
}

impl State {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            generation: 0,
            socket: None,
            attempt: None,
            scheduled: None,
            auth_refresh_armed: true,
        }
    }

    /// Stop the current attempt, then close its socket
    ///
    /// Returns whether a socket existed.
    fn teardown(&mut self) -> bool {
        self.generation += 1;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }
        match self.socket.take() {
            Some(socket) => {
                socket.close();
                true
            }
            None => false,
        }
    }

    fn cancel_scheduled(&mut self) {
        if let Some(task) = self.scheduled.take() {
            task.abort();
        }
    }

    fn close_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
    }
}

struct Inner {
    config: ClientConfig,
    url: Url,
    tokens: Arc<dyn TokenSource>,
    transport: Arc<dyn Transport>,
    state: Mutex<State>,
    registry: Mutex<ListenerRegistry>,
}

// ----------------------------------------------------------------------------
// Realtime Client
// ----------------------------------------------------------------------------

/// Handle to the realtime connection manager
///
/// Cheap to clone; all clones drive the same connection. Methods that start
/// work spawn tokio tasks and must be called from within a runtime.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn new(
        config: ClientConfig,
        tokens: Arc<dyn TokenSource>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let url = config.realtime_base()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                url,
                tokens,
                transport,
                state: Mutex::new(State::new()),
                registry: Mutex::new(ListenerRegistry::new()),
            }),
        })
    }

    /// Client using the WebSocket Socket.IO transport
    pub fn with_socketio(
        config: ClientConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, ConfigError> {
        Self::new(config, tokens, Arc::new(SocketIoTransport::new()))
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Start connecting unless a live connection already exists
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Disconnect, wait for the settle delay, then connect again
    pub fn force_reconnect(&self) {
        self.inner.force_reconnect();
    }

    /// Reconnect after the access token was replaced elsewhere
    pub async fn reconnect_with_new_token(&self) {
        self.inner.close_session(true);
        sleep(self.inner.config.token_swap_delay()).await;
        self.inner.connect();
    }

    /// Drop the connection and cancel any pending reconnect
    pub fn disconnect(&self) {
        info!("Disconnecting realtime client");
        self.inner.close_session(true);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// Whether the transport reports a live connection
    pub fn is_connected(&self) -> bool {
        self.inner
            .state
            .lock()
            .socket
            .as_ref()
            .map_or(false, ActiveSocket::is_live)
    }

    // ------------------------------------------------------------------------
    // Outbound Events
    // ------------------------------------------------------------------------

    /// Send a chat message, optionally to a room
    pub fn send_message(&self, text: &str, room: Option<&str>) {
        let Some(outbound) = self.inner.live_outbound() else {
            warn!("Cannot send message: not connected");
            self.inner
                .emit(RealtimeEvent::MessageError(MessageError::not_connected()));
            return;
        };

        let text = text.trim();
        if text.is_empty() {
            self.inner.emit(RealtimeEvent::MessageError(MessageError::empty()));
            return;
        }

        let payload = OutgoingMessage {
            message: text.to_string(),
            room: room.map(str::to_string),
        };
        if outbound
            .send(OutboundCommand::Emit(ClientEmit::SendMessage(payload)))
            .is_err()
        {
            self.inner
                .emit(RealtimeEvent::MessageError(MessageError::not_connected()));
        }
    }

    pub fn join_room(&self, room: &str) {
        self.room_request(room, ClientEmit::JoinRoom);
    }

    pub fn leave_room(&self, room: &str) {
        self.room_request(room, ClientEmit::LeaveRoom);
    }

    fn room_request(&self, room: &str, build: fn(String) -> ClientEmit) {
        let Some(outbound) = self.inner.live_outbound() else {
            warn!("Cannot change room: not connected");
            self.inner
                .emit(RealtimeEvent::RoomError(RoomError::not_connected()));
            return;
        };

        let room = room.trim();
        if room.is_empty() {
            self.inner
                .emit(RealtimeEvent::RoomError(RoomError::invalid_name()));
            return;
        }

        if outbound
            .send(OutboundCommand::Emit(build(room.to_string())))
            .is_err()
        {
            self.inner
                .emit(RealtimeEvent::RoomError(RoomError::not_connected()));
        }
    }

    /// Ask the server for a `pong`; ignored while disconnected
    pub fn ping(&self) {
        match self.inner.live_outbound() {
            Some(outbound) => {
                let _ = outbound.send(OutboundCommand::Emit(ClientEmit::Ping));
            }
            None => warn!("Cannot ping: not connected"),
        }
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Register a listener for one event kind
    pub fn on(&self, kind: EventKind, listener: Listener) -> SubscriptionId {
        self.inner.registry.lock().subscribe(kind, listener)
    }

    /// Register a closure for one event kind
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.on(kind, Arc::new(callback))
    }

    /// Remove a registration by id
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.registry.lock().unsubscribe(id)
    }

    /// Remove a listener by identity
    pub fn remove_listener(&self, kind: EventKind, listener: &Listener) -> bool {
        self.inner.registry.lock().remove_listener(kind, listener)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.registry.lock().count(kind)
    }
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RealtimeClient")
            .field("url", &self.inner.url.as_str())
            .field("status", &state.status)
            .field("generation", &state.generation)
            .field("has_socket", &state.socket.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Connection Machinery
// ----------------------------------------------------------------------------

impl Inner {
    fn emit(&self, event: RealtimeEvent) {
        let listeners = self.registry.lock().listeners_for(event.kind());
        dispatch(&listeners, &event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn live_outbound(&self) -> Option<mpsc::UnboundedSender<OutboundCommand>> {
        self.state
            .lock()
            .socket
            .as_ref()
            .filter(|socket| socket.is_live())
            .map(|socket| socket.outbound.clone())
    }

    fn connect(self: &Arc<Self>) {
        let mut state = self.state.lock();
        debug!(
            "connect() called (status: {}, socket: {})",
            state.status,
            state.socket.is_some()
        );

        if state.socket.as_ref().map_or(false, ActiveSocket::is_live) {
            debug!("Realtime client already connected");
            return;
        }

        state.cancel_scheduled();
        if state.teardown() {
            debug!("Cleaned up existing socket");
        }

        let generation = state.generation;
        let inner = Arc::clone(self);
        state.attempt = Some(tokio::spawn(async move {
            inner.run_attempt(generation).await;
        }));
    }

    fn force_reconnect(self: &Arc<Self>) {
        info!("Force reconnecting realtime client");
        self.close_session(true);

        let delay = self.config.force_reconnect_delay();
        let inner = Arc::clone(self);
        let mut state = self.state.lock();
        state.scheduled = Some(tokio::spawn(async move {
            sleep(delay).await;
            inner.scheduled_connect();
        }));
    }

    /// Connect from a scheduled task without aborting that task
    fn scheduled_connect(self: &Arc<Self>) {
        // Dropping our own handle detaches rather than aborts
        self.state.lock().scheduled.take();
        self.connect();
    }

    /// Tear down the session and mark the client disconnected
    fn close_session(&self, cancel_timers: bool) {
        let mut state = self.state.lock();
        if cancel_timers {
            state.cancel_scheduled();
        }
        let had_socket = state.teardown();
        let changed = state.status != ConnectionStatus::Disconnected;
        state.status = ConnectionStatus::Disconnected;
        drop(state);

        if had_socket || changed {
            self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Disconnected));
        }
    }

    async fn run_attempt(self: Arc<Self>, generation: u64) {
        let Some(token) = self.await_tokens(generation).await else {
            return;
        };
        let Some(events) = self.open_socket(generation, &token) else {
            return;
        };
        self.pump(generation, events).await;
    }

    /// Poll token readiness per the retry policy
    async fn await_tokens(&self, generation: u64) -> Option<String> {
        let policy = self.config.token_poll;
        let mut retry = policy.start();

        loop {
            debug!(
                "Realtime connection attempt {}/{} to {}",
                retry.attempts() + 1,
                policy.max_attempts,
                self.url
            );
            self.tokens.debug_state();

            if self.tokens.tokens_ready() {
                if let Some(token) = self.tokens.access_token() {
                    return Some(token);
                }
                error!("Access token missing although tokens are ready");
                self.fail(
                    generation,
                    ConnectionError::Handshake("access token unavailable".to_string()),
                );
                return None;
            }

            match retry.record_failure() {
                Some(delay) => {
                    debug!(
                        "Tokens not ready, retrying in {}ms (attempt {}/{})",
                        delay.as_millis(),
                        retry.attempts(),
                        policy.max_attempts
                    );
                    sleep(delay).await;
                }
                None => {
                    error!(
                        "Cannot connect: tokens not ready after {} attempts",
                        retry.attempts()
                    );
                    self.fail(
                        generation,
                        ConnectionError::TokensUnavailable {
                            attempts: retry.attempts(),
                        },
                    );
                    return None;
                }
            }
        }
    }

    fn open_socket(
        &self,
        generation: u64,
        token: &str,
    ) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return None;
            }
            state.status = ConnectionStatus::Connecting;
        }
        info!(
            "Connecting to {} with token {}",
            self.url,
            preview_token(token)
        );
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Connecting));

        let mut state = self.state.lock();
        // A listener may have torn us down while handling the status change
        if state.generation != generation {
            return None;
        }

        let channel = self.transport.open(&self.url, token);
        let liveness = channel.liveness();
        let SocketChannel {
            events, outbound, ..
        } = channel;
        state.socket = Some(ActiveSocket { outbound, liveness });
        Some(events)
    }

    async fn pump(self: &Arc<Self>, generation: u64, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let timeout = self.config.connect_timeout();
        let timer = sleep(timeout);
        tokio::pin!(timer);
        let mut handshaking = true;

        loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    let Some(event) = event else {
                        self.on_channel_closed(generation, handshaking);
                        return;
                    };
                    match event {
                        TransportEvent::Connected { sid } => {
                            handshaking = false;
                            if !self.on_connected(generation, sid) {
                                return;
                            }
                        }
                        TransportEvent::ConnectError(message) => {
                            self.on_connect_error(generation, ConnectionError::Handshake(message));
                            return;
                        }
                        TransportEvent::Disconnected(reason) => {
                            self.on_disconnected(generation, reason);
                            return;
                        }
                        TransportEvent::Inbound { event, data } => {
                            if !self.on_inbound(generation, &event, data) {
                                return;
                            }
                        }
                    }
                }
                _ = &mut timer, if handshaking => {
                    self.on_connect_timeout(generation, timeout.as_millis() as u64);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Transport Event Handling
    // ------------------------------------------------------------------------

    fn on_connected(&self, generation: u64, sid: Option<String>) -> bool {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            state.status = ConnectionStatus::Connected;
            state.auth_refresh_armed = true;
        }
        info!("Realtime connected (sid: {})", sid.as_deref().unwrap_or("-"));
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Connected));
        true
    }

    fn on_inbound(&self, generation: u64, name: &str, data: Value) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        match RealtimeEvent::from_server(name, data) {
            Ok(Some(event)) => {
                debug!("Inbound {}", name);
                self.emit(event);
            }
            Ok(None) => debug!("Ignoring unknown server event {}", name),
            Err(e) => warn!("Dropping malformed {} event: {}", name, e),
        }
        true
    }

    fn on_connect_error(self: &Arc<Self>, generation: u64, err: ConnectionError) {
        let recover = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.close_socket();
            state.status = ConnectionStatus::Error;
            let recover = err.is_auth_related() && state.auth_refresh_armed;
            if recover {
                state.auth_refresh_armed = false;
            }
            recover
        };

        error!("Realtime connection error: {}", err);
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Error));
        self.emit(RealtimeEvent::ConnectionError(err));

        if recover {
            self.schedule_auth_recovery(generation);
        } else {
            info!("Connection failed; use a manual reconnect to try again");
        }
    }

    fn on_disconnected(&self, generation: u64, reason: String) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.socket = None;
            state.status = ConnectionStatus::Disconnected;
        }
        warn!("Realtime disconnected: {}", reason);
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Disconnected));
        self.emit(RealtimeEvent::Disconnected(reason));
    }

    fn on_channel_closed(self: &Arc<Self>, generation: u64, handshaking: bool) {
        if handshaking {
            self.on_connect_error(
                generation,
                ConnectionError::Transport("closed before handshake".to_string()),
            );
        } else {
            self.on_disconnected(generation, "transport close".to_string());
        }
    }

    fn on_connect_timeout(&self, generation: u64, duration_ms: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.status != ConnectionStatus::Connecting {
                return;
            }
            state.close_socket();
            state.status = ConnectionStatus::Error;
        }
        warn!("Connection timeout after {}ms, closing socket", duration_ms);
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Error));
        self.emit(RealtimeEvent::ConnectionError(ConnectionError::Timeout {
            duration_ms,
        }));
    }

    /// Record a failure before any socket was opened
    fn fail(&self, generation: u64, err: ConnectionError) {
        {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.close_socket();
            state.status = ConnectionStatus::Error;
        }
        self.emit(RealtimeEvent::StatusChange(ConnectionStatus::Error));
        self.emit(RealtimeEvent::ConnectionError(err));
    }

    // ------------------------------------------------------------------------
    // Auth Recovery
    // ------------------------------------------------------------------------

    /// Refresh tokens once, then reconnect after the auth retry delay
    fn schedule_auth_recovery(self: &Arc<Self>, generation: u64) {
        let mut state = self.state.lock();
        // Listeners of the error may already have moved on
        if state.generation != generation {
            return;
        }
        state.cancel_scheduled();

        let tokens = Arc::clone(&self.tokens);
        let delay = self.config.auth_retry_delay();
        let inner = Arc::clone(self);
        state.scheduled = Some(tokio::spawn(async move {
            info!("Refreshing tokens for the realtime connection");
            match tokens.refresh().await {
                Ok(()) => {
                    if !inner.is_current(generation) {
                        return;
                    }
                    inner.close_session(false);
                    sleep(delay).await;
                    inner.scheduled_connect();
                }
                Err(e) => {
                    error!("Failed to refresh token: {}", e);
                    tokens.invalidate().await;
                    let changed = {
                        let mut state = inner.state.lock();
                        let changed = state.status != ConnectionStatus::Error;
                        state.status = ConnectionStatus::Error;
                        changed
                    };
                    if changed {
                        inner.emit(RealtimeEvent::StatusChange(ConnectionStatus::Error));
                    }
                    inner.emit(RealtimeEvent::AuthenticationFailed(e.to_string()));
                }
            }
        }));
    }
}
