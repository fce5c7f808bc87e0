//! Engine.IO v4 / Socket.IO v5 text packet codec
//!
//! Only the text framing is supported; binary attachments are rejected.
//!
//! ```text
//! engine:  <type>[payload]                     0{"sid":..}  2  3  4<socket packet>
//! socket:  <type>[<nsp>,][<ack id>][json]      40{"token":..}  42["event",{..}]
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

const DEFAULT_NAMESPACE: &str = "/";

// ----------------------------------------------------------------------------
// Engine.IO
// ----------------------------------------------------------------------------

/// Parameters sent by the server in the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let payload = chars.as_str();

        let packet = match kind {
            '0' => EnginePacket::Open(
                serde_json::from_str(payload)
                    .map_err(|e| ProtocolError::InvalidPayload(format!("open: {}", e)))?,
            ),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(payload.to_string()),
            '3' => EnginePacket::Pong(payload.to_string()),
            '4' => EnginePacket::Message(payload.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(ProtocolError::UnknownPacketType(other)),
        };
        Ok(packet)
    }

    /// Encode a client-originated packet
    pub fn encode(&self) -> String {
        match self {
            // Clients never send an open packet
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Socket.IO
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        args: Vec<Value>,
    },
    ConnectError {
        namespace: String,
        message: String,
    },
}

impl SocketPacket {
    /// Connect to the default namespace carrying an auth payload
    pub fn connect_with_auth(auth: Value) -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: Some(auth),
        }
    }

    pub fn disconnect() -> Self {
        SocketPacket::Disconnect {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Event on the default namespace without acknowledgement
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            name: name.into(),
            args,
        }
    }

    pub fn decode(packet: &str) -> Result<Self, ProtocolError> {
        let mut chars = packet.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let mut rest = chars.as_str();

        if matches!(kind, '5' | '6') {
            return Err(ProtocolError::InvalidPayload(
                "binary packets are not supported".to_string(),
            ));
        }

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(idx) => {
                    let nsp = &rest[..idx];
                    rest = &rest[idx + 1..];
                    nsp.to_string()
                }
                None => {
                    let nsp = rest;
                    rest = "";
                    nsp.to_string()
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| ProtocolError::InvalidPayload(format!("ack id: {}", e)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(rest)
                    .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?,
            )
        };

        let packet = match kind {
            '0' => SocketPacket::Connect { namespace, data },
            '1' => SocketPacket::Disconnect { namespace },
            '2' => {
                let mut args = match data {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(ProtocolError::InvalidPayload(
                            "event payload must be an array".to_string(),
                        ))
                    }
                };
                if args.is_empty() {
                    return Err(ProtocolError::InvalidPayload("event without a name".to_string()));
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(ProtocolError::InvalidPayload(format!(
                            "event name must be a string, got {}",
                            other
                        )))
                    }
                };
                SocketPacket::Event {
                    namespace,
                    ack_id,
                    name,
                    args,
                }
            }
            '3' => {
                let ack_id = ack_id.ok_or_else(|| {
                    ProtocolError::InvalidPayload("ack without an id".to_string())
                })?;
                let args = match data {
                    Some(Value::Array(items)) => items,
                    Some(other) => vec![other],
                    None => Vec::new(),
                };
                SocketPacket::Ack {
                    namespace,
                    ack_id,
                    args,
                }
            }
            '4' => {
                let message = match data {
                    Some(Value::Object(map)) => match map.get("message") {
                        Some(Value::String(message)) => message.clone(),
                        _ => Value::Object(map).to_string(),
                    },
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => "connection refused".to_string(),
                };
                SocketPacket::ConnectError { namespace, message }
            }
            other => return Err(ProtocolError::UnknownPacketType(other)),
        };
        Ok(packet)
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect { namespace, data } => {
                let body = data.as_ref().map(Value::to_string).unwrap_or_default();
                format!("0{}{}", namespace_prefix(namespace), body)
            }
            SocketPacket::Disconnect { namespace } => format!("1{}", namespace_prefix(namespace)),
            SocketPacket::Event {
                namespace,
                ack_id,
                name,
                args,
            } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(name.clone()));
                items.extend(args.iter().cloned());
                format!(
                    "2{}{}{}",
                    namespace_prefix(namespace),
                    ack_id.map(|id| id.to_string()).unwrap_or_default(),
                    Value::Array(items)
                )
            }
            SocketPacket::Ack {
                namespace,
                ack_id,
                args,
            } => format!(
                "3{}{}{}",
                namespace_prefix(namespace),
                ack_id,
                Value::Array(args.clone())
            ),
            SocketPacket::ConnectError { namespace, message } => format!(
                "4{}{}",
                namespace_prefix(namespace),
                serde_json::json!({ "message": message })
            ),
        }
    }
}

fn namespace_prefix(namespace: &str) -> String {
    if namespace == DEFAULT_NAMESPACE || namespace.is_empty() {
        String::new()
    } else {
        format!("{},", namespace)
    }
}
