//! Conversation wire types.

use serde::{Deserialize, Serialize};

use crate::message::WireMessage;
use crate::user::{UserId, UserProfile};

/// Conversation (chat) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    /// Creates a conversation identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string form of this identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pairwise conversation as returned by the request API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireConversation {
    /// Conversation identifier.
    #[serde(rename = "_id")]
    pub id: ChatId,
    /// The two participants.
    #[serde(default)]
    pub participants: Vec<UserProfile>,
    /// Message history, oldest first. List responses may carry only a tail.
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

impl WireConversation {
    /// Returns the participant that is not `me`.
    #[must_use]
    pub fn other_participant(&self, me: &UserId) -> Option<&UserProfile> {
        self.participants.iter().find(|p| &p.id != me)
    }
}

/// Body of the create-or-get request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// The user to open a conversation with.
    pub user_id: UserId,
}

/// Body of the durable mark-read request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Message being acknowledged.
    pub message_id: crate::message::MessageId,
}
