//! Message wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::user::UserRef;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Message identifier.
///
/// Confirmed messages carry the id the server assigned. Optimistic messages
/// carry a client-generated id until they are reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a message identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ClientToken> for MessageId {
    fn from(token: &ClientToken) -> Self {
        Self(token.0.clone())
    }
}

/// Client-generated idempotency token attached to an outgoing message.
///
/// Servers that support it echo the token back inside the confirming
/// `receive_message` payload, which lets the client resolve the exact
/// optimistic entry instead of guessing by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientToken(String);

impl ClientToken {
    /// Generates a fresh, time-ordered token (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Creates a token from an existing string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the string form of this token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as it appears on the wire, inside conversation payloads and
/// `receive_message` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned identifier.
    #[serde(rename = "_id")]
    pub id: MessageId,
    /// Sender, either a bare id or a populated profile.
    pub sender: UserRef,
    /// Text content.
    pub content: String,
    /// Server timestamp.
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    /// Users who have read the message, in either reference shape.
    #[serde(default)]
    pub read_by: Vec<UserRef>,
    /// Idempotency token echoed back by servers that support it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientToken>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::UserId;

    #[test]
    fn decodes_populated_sender_and_readers() {
        let json = r#"{
            "_id": "srv-42",
            "sender": {"_id": "u-1", "username": "ayse"},
            "content": "hi",
            "timestamp": "2024-05-01T10:00:00Z",
            "readBy": ["u-2", {"_id": "u-3"}]
        }"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();

        assert_eq!(msg.id, MessageId::new("srv-42"));
        assert_eq!(msg.sender.id(), &UserId::new("u-1"));
        let readers: Vec<&str> = msg.read_by.iter().map(|r| r.id().as_str()).collect();
        assert_eq!(readers, vec!["u-2", "u-3"]);
        assert!(msg.client_id.is_none());
    }

    #[test]
    fn missing_read_by_defaults_to_empty() {
        let json = r#"{"_id":"srv-1","sender":"u-1","content":"x","timestamp":"2024-05-01T10:00:00Z"}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert!(msg.read_by.is_empty());
    }

    #[test]
    fn client_id_is_echoed_under_camel_case_key() {
        let json = r#"{"_id":"srv-1","sender":"u-1","content":"x","clientId":"tok-1"}"#;
        let msg: WireMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.client_id, Some(ClientToken::new("tok-1")));
    }

    #[test]
    fn generated_tokens_are_distinct() {
        let a = ClientToken::generate();
        let b = ClientToken::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn message_id_from_token_keeps_text() {
        let token = ClientToken::new("tok-7");
        assert_eq!(MessageId::from(&token).as_str(), "tok-7");
    }
}
