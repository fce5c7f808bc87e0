//! Wire payloads shared by the HTTP and realtime contracts
//!
//! Chat payloads are passed through to consumers untouched; the client never
//! mutates them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tokens::CredentialPair;

// ----------------------------------------------------------------------------
// Authentication Payloads
// ----------------------------------------------------------------------------

/// Profile of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Result of a successful login or registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user: User,
    pub tokens: CredentialPair,
}

/// Envelope returned by `/auth/login`, `/auth/register` and `/auth/refresh`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct AuthEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub tokens: Option<CredentialPair>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

impl AuthEnvelope {
    /// Server-supplied failure text, if any
    pub fn failure_message(&self) -> Option<String> {
        if let Some(error) = self.error.as_ref().filter(|e| !e.is_empty()) {
            return Some(error.clone());
        }
        self.errors
            .as_ref()
            .filter(|errors| !errors.is_empty())
            .map(|errors| errors.join(", "))
    }
}

/// Body of `GET /auth/profile`
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProfileEnvelope {
    pub user: User,
}

// ----------------------------------------------------------------------------
// Chat Payloads
// ----------------------------------------------------------------------------

/// Message identifier; the server uses both numeric and string ids
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Author of a chat message
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    /// Present on chatbot responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Sender {
    /// Best human-readable label for the author
    pub fn display_name(&self) -> &str {
        if !self.email.is_empty() {
            &self.email
        } else if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            name
        } else {
            "AI Assistant"
        }
    }
}

/// Response-generation details attached by the chatbot
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Milliseconds spent producing the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
}

/// Chat message as carried by `newMessage` and `chatbotResponse`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    #[serde(rename = "message")]
    pub text: String,
    pub sender: Sender,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

/// Payload of `userCount`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCount {
    pub count: u64,
    #[serde(default)]
    pub timestamp: String,
}

/// Payload of the outbound `sendMessage` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chatbot_response_parsing() {
        let raw = json!({
            "id": "resp-1",
            "message": "Your order shipped yesterday.",
            "sender": { "userId": "bot", "name": "AI Assistant" },
            "timestamp": "2024-05-01T10:00:00.000Z",
            "metadata": { "confidence": 0.92, "processingTime": 840, "cached": false }
        });

        let message: ChatMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.id, MessageId::Text("resp-1".into()));
        assert_eq!(message.sender.display_name(), "AI Assistant");
        let metadata = message.metadata.unwrap();
        assert_eq!(metadata.processing_time, Some(840));
        assert_eq!(metadata.cached, Some(false));
    }

    #[test]
    fn test_numeric_message_id() {
        let raw = json!({
            "id": 1714557600000i64,
            "message": "hi",
            "sender": { "userId": "u1", "email": "ann@example.com" },
            "timestamp": "2024-05-01T10:00:00.000Z",
            "room": "general"
        });

        let message: ChatMessage = serde_json::from_value(raw).unwrap();
        assert_eq!(message.id.to_string(), "1714557600000");
        assert_eq!(message.room.as_deref(), Some("general"));
        assert_eq!(message.sender.display_name(), "ann@example.com");
    }

    #[test]
    fn test_outgoing_message_omits_missing_room() {
        let payload = OutgoingMessage {
            message: "hello".into(),
            room: None,
        };
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({ "message": "hello" }));
    }

    #[test]
    fn test_failure_message_precedence() {
        let envelope: AuthEnvelope = serde_json::from_value(json!({
            "success": false,
            "errors": ["Email is invalid", "Password too short"]
        }))
        .unwrap();
        assert_eq!(
            envelope.failure_message().as_deref(),
            Some("Email is invalid, Password too short")
        );

        let envelope: AuthEnvelope = serde_json::from_value(json!({
            "success": false,
            "error": "User already exists",
            "errors": ["ignored"]
        }))
        .unwrap();
        assert_eq!(envelope.failure_message().as_deref(), Some("User already exists"));
    }
}
