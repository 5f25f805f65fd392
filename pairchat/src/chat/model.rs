//! Normalized chat records.
//!
//! Wire payloads are converted once, at ingestion, into the types here: the
//! polymorphic sender and reader references collapse into plain
//! [`UserId`]s, and a message remembers whether it is still an optimistic
//! placeholder.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use pairchat_proto::conversation::ChatId;
use pairchat_proto::message::{ClientToken, MessageId, WireMessage};
use pairchat_proto::user::UserId;

/// A message in a conversation timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id once confirmed; the client token while optimistic.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ChatId,
    /// Normalized sender.
    pub sender_id: UserId,
    /// Sender display name when the payload carried one.
    pub sender_name: Option<String>,
    /// Text content.
    pub content: String,
    /// Server timestamp, or local send time while optimistic.
    pub timestamp: DateTime<Utc>,
    /// Users who have read the message. Never shrinks.
    pub read_by: BTreeSet<UserId>,
    /// True until a server push confirms the message.
    pub is_optimistic: bool,
    /// Idempotency token of a message this client sent.
    pub client_token: Option<ClientToken>,
}

impl Message {
    /// Normalizes a confirmed wire message.
    #[must_use]
    pub fn from_wire(conversation_id: ChatId, wire: WireMessage) -> Self {
        Self {
            sender_name: wire.sender.username().map(str::to_string),
            sender_id: wire.sender.id().clone(),
            read_by: wire.read_by.iter().map(|r| r.id().clone()).collect(),
            id: wire.id,
            conversation_id,
            content: wire.content,
            timestamp: wire.timestamp,
            is_optimistic: false,
            client_token: wire.client_id,
        }
    }

    /// A placeholder for text the session user just sent.
    #[must_use]
    pub fn optimistic(
        conversation_id: ChatId,
        sender_id: UserId,
        content: String,
        token: ClientToken,
    ) -> Self {
        Self {
            id: MessageId::from(&token),
            conversation_id,
            sender_id,
            sender_name: None,
            content,
            timestamp: Utc::now(),
            read_by: BTreeSet::new(),
            is_optimistic: true,
            client_token: Some(token),
        }
    }

    /// Whether `user` sent this message.
    #[must_use]
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Whether `user` is among the readers.
    #[must_use]
    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.contains(user)
    }

    /// Delivery state of a message sent by `me`, as shown next to it.
    ///
    /// Returns `None` for messages from the other participant.
    #[must_use]
    pub fn receipt_state(&self, me: &UserId) -> Option<ReceiptState> {
        if !self.is_from(me) {
            return None;
        }
        if self.is_optimistic {
            return Some(ReceiptState::Pending);
        }
        if self.read_by.iter().any(|r| r != me) {
            Some(ReceiptState::Read)
        } else {
            Some(ReceiptState::Sent)
        }
    }
}

/// Delivery state of an own message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptState {
    /// Not yet confirmed by the server.
    Pending,
    /// Confirmed, not yet read by the other participant.
    Sent,
    /// Read by the other participant.
    Read,
}

impl ReceiptState {
    /// Tick marks for terminal rendering.
    #[must_use]
    pub const fn ticks(self) -> &'static str {
        match self {
            Self::Pending => "…",
            Self::Sent => "✓",
            Self::Read => "✓✓",
        }
    }
}

/// A transient read acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub reader_id: UserId,
    pub timestamp: DateTime<Utc>,
}
