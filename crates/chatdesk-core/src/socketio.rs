//! Socket.IO over a plain WebSocket
//!
//! Runs one connection per [`Transport::open`] call in its own task. Polling
//! and transport upgrades are not used, and nothing here reconnects: when the
//! socket goes away the task reports it and exits.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ProtocolError;
use crate::transport::{self, ClientEmit, OutboundCommand, SocketChannel, Transport, TransportEnd, TransportEvent};
use crate::wire::{EnginePacket, OpenHandshake, SocketPacket};

const ENGINE_IO_PATH: &str = "/socket.io/";

/// Build the WebSocket endpoint for a realtime service base URL
pub fn websocket_url(base: &Url) -> Result<Url, ProtocolError> {
    let mut url = base.clone();
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ProtocolError::InvalidPayload(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| ProtocolError::InvalidPayload(format!("cannot use scheme {}", scheme)))?;

    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{}{}", prefix, ENGINE_IO_PATH));
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

// ----------------------------------------------------------------------------
// Transport
// ----------------------------------------------------------------------------

/// WebSocket-only Socket.IO transport
#[derive(Debug, Clone, Default)]
pub struct SocketIoTransport;

impl SocketIoTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SocketIoTransport {
    fn open(&self, url: &Url, token: &str) -> SocketChannel {
        let (channel, end) = transport::channel();

        match websocket_url(url) {
            Ok(ws_url) => {
                debug!("Opening realtime socket to {}", ws_url);
                tokio::spawn(run_connection(ws_url, token.to_string(), end));
            }
            Err(e) => {
                end.report(TransportEvent::ConnectError(e.to_string()));
            }
        }

        channel
    }
}

// ----------------------------------------------------------------------------
// Connection Task
// ----------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Exit {
    /// Closed at the client's request
    Requested,
    /// Lost the connection; reason for the client
    Lost(String),
}

/// Open the WebSocket and wait for the Engine.IO open packet
async fn open_engine(url: &Url) -> Result<(WsStream, OpenHandshake), String> {
    let (mut socket, _) = connect_async(url.as_str()).await.map_err(|e| e.to_string())?;
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(frame))) => match EnginePacket::decode(&frame) {
                Ok(EnginePacket::Open(handshake)) => return Ok((socket, handshake)),
                Ok(other) => debug!("Ignoring {:?} before open", other),
                Err(e) => return Err(e.to_string()),
            },
            Some(Ok(Message::Close(_))) | None => {
                return Err("connection closed during handshake".to_string())
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.to_string()),
        }
    }
}

/// Drain commands queued while opening; true if the client gave up
fn close_pending(end: &mut TransportEnd) -> bool {
    loop {
        match end.outbound.try_recv() {
            Ok(OutboundCommand::Emit(emit)) => {
                warn!("Dropping {} before the handshake completed", emit.event_name())
            }
            Ok(OutboundCommand::Close) | Err(TryRecvError::Disconnected) => return true,
            Err(TryRecvError::Empty) => return false,
        }
    }
}

async fn run_connection(url: Url, token: String, mut end: TransportEnd) {
    // The token is not sent until the socket is open, so a close requested
    // before then abandons the attempt without reaching the server.
    let opening = open_engine(&url);
    tokio::pin!(opening);
    let opened = loop {
        tokio::select! {
            biased;
            command = end.outbound.recv() => match command {
                Some(OutboundCommand::Emit(emit)) => {
                    warn!("Dropping {} before the handshake completed", emit.event_name());
                }
                Some(OutboundCommand::Close) | None => {
                    debug!("Realtime socket closed before authenticating");
                    return;
                }
            },
            result = &mut opening => break result,
        }
    };
    let (socket, handshake) = match opened {
        Ok(opened) => opened,
        Err(reason) => {
            end.report(TransportEvent::ConnectError(reason));
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    if close_pending(&mut end) {
        debug!("Realtime socket closed before authenticating");
        let _ = sink.close().await;
        return;
    }
    debug!(
        "Engine.IO session {} (ping interval {}ms, timeout {}ms)",
        handshake.sid, handshake.ping_interval, handshake.ping_timeout
    );

    let connect = SocketPacket::connect_with_auth(json!({ "token": token }));
    if let Err(e) = sink
        .send(Message::Text(EnginePacket::Message(connect.encode()).encode()))
        .await
    {
        end.report(TransportEvent::ConnectError(e.to_string()));
        return;
    }

    // Only server traffic counts as a sign of life
    let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let watchdog = sleep(heartbeat);
    tokio::pin!(watchdog);
    let mut connected = false;

    let exit = loop {
        tokio::select! {
            _ = &mut watchdog => break Exit::Lost("ping timeout".to_string()),
            frame = stream.next() => {
                watchdog.as_mut().reset(Instant::now() + heartbeat);
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break Exit::Lost("transport close".to_string()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => break Exit::Lost(format!("transport error: {}", e)),
                };

                let packet = match EnginePacket::decode(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Dropping malformed engine frame: {}", e);
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Ping(data) => {
                        if sink.send(Message::Text(EnginePacket::Pong(data).encode())).await.is_err() {
                            break Exit::Lost("transport error".to_string());
                        }
                    }
                    EnginePacket::Close => break Exit::Lost("transport close".to_string()),
                    EnginePacket::Message(payload) => {
                        let packet = match SocketPacket::decode(&payload) {
                            Ok(packet) => packet,
                            Err(e) => {
                                warn!("Dropping malformed socket packet: {}", e);
                                continue;
                            }
                        };
                        match packet {
                            SocketPacket::Connect { data, .. } => {
                                connected = true;
                                end.set_live(true);
                                let sid = data
                                    .as_ref()
                                    .and_then(|d| d.get("sid"))
                                    .and_then(Value::as_str)
                                    .map(str::to_string);
                                end.report(TransportEvent::Connected { sid });
                            }
                            SocketPacket::ConnectError { message, .. } => {
                                end.report(TransportEvent::ConnectError(message));
                                let _ = sink.close().await;
                                return;
                            }
                            SocketPacket::Event { name, args, .. } => {
                                let data = args.into_iter().next().unwrap_or(Value::Null);
                                end.report(TransportEvent::Inbound { event: name, data });
                            }
                            SocketPacket::Disconnect { .. } => {
                                break Exit::Lost("io server disconnect".to_string());
                            }
                            SocketPacket::Ack { .. } => {}
                        }
                    }
                    EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
                }
            }
            command = end.outbound.recv() => {
                match command {
                    Some(OutboundCommand::Emit(emit)) => {
                        if !connected {
                            warn!("Dropping {} before the handshake completed", emit.event_name());
                            continue;
                        }
                        if sink.send(Message::Text(encode_emit(&emit))).await.is_err() {
                            break Exit::Lost("transport error".to_string());
                        }
                    }
                    Some(OutboundCommand::Close) | None => break Exit::Requested,
                }
            }
        }
    };

    end.set_live(false);
    match exit {
        Exit::Requested => {
            debug!("Closing realtime socket on request");
            let _ = sink
                .send(Message::Text(EnginePacket::Message(SocketPacket::disconnect().encode()).encode()))
                .await;
            let _ = sink.close().await;
        }
        Exit::Lost(reason) => {
            info!("Realtime socket lost: {}", reason);
            if connected {
                end.report(TransportEvent::Disconnected(reason));
            } else {
                end.report(TransportEvent::ConnectError(reason));
            }
        }
    }
}

fn encode_emit(emit: &ClientEmit) -> String {
    EnginePacket::Message(SocketPacket::event(emit.event_name(), emit.args()).encode()).encode()
}
