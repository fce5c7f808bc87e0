//! Interactive chat session
//!
//! Drives a [`RealtimeClient`] from the terminal: server events are bridged
//! into a channel by listeners and rendered by a single loop that also reads
//! stdin and runs the periodic connection health check.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use chatdesk_core::{
    ChatMessage, ConnectionStatus, EventKind, RealtimeClient, RealtimeEvent, SubscriptionId,
    TokenClaims, TokenManager,
};

use crate::config::CliConfig;
use crate::error::{CliError, Result};

/// Kinds the terminal renders
const RENDERED_KINDS: [EventKind; 12] = [
    EventKind::StatusChange,
    EventKind::Authenticated,
    EventKind::AuthenticationFailed,
    EventKind::ConnectionError,
    EventKind::Disconnected,
    EventKind::NewMessage,
    EventKind::ChatbotResponse,
    EventKind::UserCount,
    EventKind::RoomJoined,
    EventKind::MessageError,
    EventKind::RoomError,
    EventKind::Pong,
];

// ----------------------------------------------------------------------------
// Input Parsing
// ----------------------------------------------------------------------------

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Message(String),
    Join(String),
    Leave(String),
    Ping,
    Reconnect,
    Status,
    Quit,
    Help,
    Unknown(String),
    Empty,
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Input::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Input::Message(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match name {
            "join" => Input::Join(arg.to_string()),
            "leave" => Input::Leave(arg.to_string()),
            "ping" => Input::Ping,
            "reconnect" => Input::Reconnect,
            "status" => Input::Status,
            "quit" | "exit" => Input::Quit,
            "help" => Input::Help,
            other => Input::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "Commands: /join <room>, /leave <room>, /ping, /reconnect, /status, /quit";

// ----------------------------------------------------------------------------
// Health Check
// ----------------------------------------------------------------------------

/// Whether the periodic health check should force a reconnect
///
/// A `connected` status with a dead transport is stale; any state other than
/// `connecting` or `connected` means nothing is trying to recover.
pub fn needs_reconnect(status: ConnectionStatus, transport_live: bool) -> bool {
    match status {
        ConnectionStatus::Connected => !transport_live,
        ConnectionStatus::Connecting => false,
        ConnectionStatus::Disconnected | ConnectionStatus::Error => true,
    }
}

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------

/// Terminal line for an event, if it has one
pub fn render_event(event: &RealtimeEvent, own_user_id: Option<&str>) -> Option<String> {
    match event {
        RealtimeEvent::StatusChange(status) => Some(format!("* status: {}", status)),
        RealtimeEvent::Authenticated(_) => Some(
            "* Connected. Welcome to Chatdesk support, how can we help you today?".to_string(),
        ),
        RealtimeEvent::AuthenticationFailed(reason) => {
            Some(format!("* Your session has expired ({}). Please log in again.", reason))
        }
        RealtimeEvent::ConnectionError(error) => Some(format!(
            "* Connection error: {}. Attempting to reconnect...",
            error
        )),
        RealtimeEvent::Disconnected(reason) => Some(format!("* Disconnected: {}", reason)),
        RealtimeEvent::NewMessage(message) => {
            if own_user_id == Some(message.sender.user_id.as_str()) {
                None
            } else {
                Some(render_message(message))
            }
        }
        RealtimeEvent::ChatbotResponse(message) => Some(render_message(message)),
        RealtimeEvent::UserCount(count) => Some(format!("* {} user(s) online", count.count)),
        RealtimeEvent::RoomJoined(data) => {
            let room = data.get("room").and_then(|r| r.as_str()).unwrap_or("room");
            Some(format!("* Joined {}", room))
        }
        RealtimeEvent::MessageError(error) => Some(format!("! Message failed: {}", error)),
        RealtimeEvent::RoomError(error) => Some(format!("! Room request failed: {}", error)),
        RealtimeEvent::Pong(_) => Some("* pong".to_string()),
        _ => None,
    }
}

fn render_message(message: &ChatMessage) -> String {
    let mut line = format!("{}: {}", message.sender.display_name(), message.text);
    if let Some(metadata) = &message.metadata {
        let mut details = Vec::new();
        if let Some(confidence) = metadata.confidence {
            details.push(format!("confidence {:.0}%", confidence * 100.0));
        }
        if let Some(ms) = metadata.processing_time {
            details.push(format!("{}ms", ms));
        }
        if metadata.cached == Some(true) {
            details.push("cached".to_string());
        }
        if !details.is_empty() {
            line.push_str(&format!(" [{}]", details.join(", ")));
        }
    }
    line
}

/// What the chat loop does about a client event
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reaction {
    JoinRoom,
    RetryLater,
    /// Stop the session; the client has already discarded the tokens
    End(String),
    Nothing,
}

fn reaction_to(event: &RealtimeEvent) -> Reaction {
    match event {
        RealtimeEvent::Authenticated(_) => Reaction::JoinRoom,
        RealtimeEvent::ConnectionError(_) => Reaction::RetryLater,
        RealtimeEvent::AuthenticationFailed(reason) => Reaction::End(reason.clone()),
        _ => Reaction::Nothing,
    }
}

// ----------------------------------------------------------------------------
// Chat Session
// ----------------------------------------------------------------------------

pub struct ChatSession {
    client: RealtimeClient,
    tokens: Arc<TokenManager>,
    config: CliConfig,
    room: Option<String>,
    own_user_id: Option<String>,
}

impl ChatSession {
    pub fn new(
        client: RealtimeClient,
        tokens: Arc<TokenManager>,
        config: CliConfig,
        room: Option<String>,
    ) -> Self {
        let own_user_id = tokens
            .get_access_token()
            .and_then(|token| TokenClaims::decode(&token).ok())
            .and_then(|claims| claims.user_id);
        Self {
            client,
            tokens,
            config,
            room,
            own_user_id,
        }
    }

    /// Run until the user quits or the session is rejected
    pub async fn run(mut self) -> Result<()> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let subscriptions = self.bridge_events(event_tx);

        match self.tokens.profile().await {
            Ok(user) => {
                println!("Signed in as {}", user.email);
                self.own_user_id = Some(user.id);
            }
            Err(e) => warn!("Could not load profile: {}", e),
        }

        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        let mut health = interval_at(
            Instant::now() + self.config.health_check_interval(),
            self.config.health_check_interval(),
        );
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let connect_at = sleep_until(Instant::now() + self.config.initial_connect_delay());
        tokio::pin!(connect_at);
        let mut connect_pending = true;
        let mut retry_at: Option<Instant> = None;

        println!("{}", HELP);
        let outcome = loop {
            self.prompt().await;
            tokio::select! {
                _ = &mut connect_at, if connect_pending => {
                    connect_pending = false;
                    if self.client.status() == ConnectionStatus::Disconnected {
                        info!("Opening realtime connection");
                        self.client.connect();
                    }
                }
                Some(event) = events.recv() => {
                    if let Some(line) = render_event(&event, self.own_user_id.as_deref()) {
                        println!("{}", line);
                    }
                    match reaction_to(&event) {
                        Reaction::JoinRoom => {
                            if let Some(room) = &self.room {
                                self.client.join_room(room);
                            }
                        }
                        Reaction::RetryLater => {
                            retry_at = Some(Instant::now() + self.config.error_retry_delay());
                        }
                        Reaction::End(reason) => break Err(CliError::SessionEnded(reason)),
                        Reaction::Nothing => {}
                    }
                }
                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    retry_at = None;
                    // Auth recovery may already have reconnected
                    let recovered = !needs_reconnect(self.client.status(), self.client.is_connected());
                    if self.tokens.is_authenticated() && !recovered {
                        info!("Retrying realtime connection after error");
                        self.client.force_reconnect();
                    }
                }
                _ = health.tick() => {
                    let status = self.client.status();
                    if needs_reconnect(status, self.client.is_connected()) {
                        info!("Connection health check: attempting reconnect ({})", status);
                        self.client.force_reconnect();
                    } else {
                        debug!("Connection health check passed");
                    }
                }
                line = stdin.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if self.handle_input(Input::parse(&line)) {
                                break Ok(());
                            }
                        }
                        Ok(None) => break Ok(()),
                        Err(e) => break Err(e.into()),
                    }
                }
            }
        };

        for id in subscriptions {
            self.client.off(id);
        }
        self.client.disconnect();
        outcome
    }

    fn bridge_events(&self, tx: mpsc::UnboundedSender<RealtimeEvent>) -> Vec<SubscriptionId> {
        RENDERED_KINDS
            .iter()
            .map(|kind| {
                let tx = tx.clone();
                self.client.subscribe(*kind, move |event| {
                    let _ = tx.send(event.clone());
                })
            })
            .collect()
    }

    /// Apply one line of input; returns true when the session should end
    fn handle_input(&mut self, input: Input) -> bool {
        match input {
            Input::Message(text) => self.client.send_message(&text, self.room.as_deref()),
            Input::Join(room) => {
                self.client.join_room(&room);
                if !room.trim().is_empty() {
                    self.room = Some(room.trim().to_string());
                }
            }
            Input::Leave(room) => {
                let room = if room.is_empty() {
                    self.room.clone().unwrap_or_default()
                } else {
                    room
                };
                self.client.leave_room(&room);
                if self.room.as_deref() == Some(room.trim()) {
                    self.room = None;
                }
            }
            Input::Ping => self.client.ping(),
            Input::Reconnect => self.client.force_reconnect(),
            Input::Status => {
                println!(
                    "* status: {}, transport live: {}, room: {}",
                    self.client.status(),
                    self.client.is_connected(),
                    self.room.as_deref().unwrap_or("-")
                );
            }
            Input::Help => println!("{}", HELP),
            Input::Unknown(name) => println!("Unknown command /{}. {}", name, HELP),
            Input::Quit => return true,
            Input::Empty => {}
        }
        false
    }

    async fn prompt(&self) {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(self.config.prompt.as_bytes()).await;
        let _ = stdout.flush().await;
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("client", &self.client)
            .field("room", &self.room)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chatdesk_core::{
        ConnectionError, MessageError, MessageId, MessageMetadata, Sender, UserCount,
    };
    use serde_json::json;

    fn message(user_id: &str, email: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::Number(1),
            text: text.to_string(),
            sender: Sender {
                user_id: user_id.to_string(),
                email: email.to_string(),
                name: None,
            },
            timestamp: "2024-05-01T10:00:00.000Z".to_string(),
            room: None,
            metadata: None,
        }
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("  hello there "), Input::Message("hello there".into()));
        assert_eq!(Input::parse("/join billing"), Input::Join("billing".into()));
        assert_eq!(Input::parse("/leave"), Input::Leave(String::new()));
        assert_eq!(Input::parse("/ping"), Input::Ping);
        assert_eq!(Input::parse("/reconnect"), Input::Reconnect);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse("/dance"), Input::Unknown("dance".into()));
        assert_eq!(Input::parse("   "), Input::Empty);
    }

    #[test]
    fn test_health_check_decision() {
        assert!(!needs_reconnect(ConnectionStatus::Connected, true));
        assert!(needs_reconnect(ConnectionStatus::Connected, false));
        assert!(!needs_reconnect(ConnectionStatus::Connecting, false));
        assert!(needs_reconnect(ConnectionStatus::Disconnected, false));
        assert!(needs_reconnect(ConnectionStatus::Error, false));
    }

    #[test]
    fn test_own_messages_are_not_echoed() {
        let own = RealtimeEvent::NewMessage(message("u1", "me@example.com", "hi"));
        assert_eq!(render_event(&own, Some("u1")), None);

        let other = RealtimeEvent::NewMessage(message("u2", "agent@example.com", "hello"));
        assert_eq!(
            render_event(&other, Some("u1")).as_deref(),
            Some("agent@example.com: hello")
        );
    }

    #[test]
    fn test_chatbot_response_shows_metadata() {
        let mut reply = message("bot", "", "Your order shipped.");
        reply.sender.name = Some("AI Assistant".to_string());
        reply.metadata = Some(MessageMetadata {
            confidence: Some(0.92),
            processing_time: Some(840),
            cached: Some(true),
        });

        assert_eq!(
            render_event(&RealtimeEvent::ChatbotResponse(reply), None).as_deref(),
            Some("AI Assistant: Your order shipped. [confidence 92%, 840ms, cached]")
        );
    }

    #[test]
    fn test_render_lifecycle_events() {
        let count = RealtimeEvent::UserCount(UserCount {
            count: 3,
            timestamp: String::new(),
        });
        assert_eq!(render_event(&count, None).as_deref(), Some("* 3 user(s) online"));

        let failed = RealtimeEvent::MessageError(MessageError::not_connected());
        assert_eq!(
            render_event(&failed, None).as_deref(),
            Some("! Message failed: Not connected to server")
        );

        let error = RealtimeEvent::ConnectionError(ConnectionError::Timeout { duration_ms: 15000 });
        assert!(render_event(&error, None).unwrap().contains("connection timeout after 15000ms"));

        let joined = RealtimeEvent::RoomJoined(json!({ "room": "billing" }));
        assert_eq!(render_event(&joined, None).as_deref(), Some("* Joined billing"));

        assert_eq!(render_event(&RealtimeEvent::MessageSent(json!({})), None), None);
    }

    #[test]
    fn test_event_reactions() {
        assert_eq!(
            reaction_to(&RealtimeEvent::Authenticated(json!({ "userId": "u1" }))),
            Reaction::JoinRoom
        );
        assert_eq!(
            reaction_to(&RealtimeEvent::ConnectionError(ConnectionError::Timeout {
                duration_ms: 15000
            })),
            Reaction::RetryLater
        );
        assert_eq!(
            reaction_to(&RealtimeEvent::AuthenticationFailed("refresh rejected".into())),
            Reaction::End("refresh rejected".into())
        );
        assert_eq!(
            reaction_to(&RealtimeEvent::Disconnected("io server disconnect".into())),
            Reaction::Nothing
        );
    }
}
