//! Named channel events.
//!
//! Every frame on the push channel is a JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. Outbound events are emitted by
//! the client; inbound events are pushed by the server.

use serde::{Deserialize, Serialize};

use crate::conversation::ChatId;
use crate::message::{ClientToken, MessageId, WireMessage};
use crate::user::{UserId, UserRef};

/// Events the client emits on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Announces the session user right after the channel opens.
    UserConnected(UserId),
    /// Enters a conversation-scoped room.
    JoinNewChat(ChatId),
    /// Leaves a conversation-scoped room.
    LeaveChat(ChatId),
    /// Sends a message to the other participant.
    SendMessage(SendMessage),
    /// Low-latency read acknowledgement.
    MessageRead(MessageRead),
}

impl OutboundEvent {
    /// Returns the wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::UserConnected(_) => "user_connected",
            Self::JoinNewChat(_) => "join_new_chat",
            Self::LeaveChat(_) => "leave_chat",
            Self::SendMessage(_) => "send_message",
            Self::MessageRead(_) => "message_read",
        }
    }
}

/// Payload of [`OutboundEvent::SendMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target conversation.
    pub chat_id: ChatId,
    /// Text content.
    pub message: String,
    /// Session user.
    pub sender_id: UserId,
    /// The non-self participant.
    pub receiver_id: UserId,
    /// Idempotency token the server should echo back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientToken>,
}

/// Payload of [`OutboundEvent::MessageRead`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Message being acknowledged.
    pub message_id: MessageId,
    /// The reading user.
    pub reader_id: UserId,
}

/// Events the server pushes to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A confirmed message, either the echo of our own send or a new one.
    ReceiveMessage(ReceiveMessage),
    /// The server rejected an outbound send.
    MessageError(MessageError),
    /// Authoritative read state for a message.
    MessageReadUpdate(ReadUpdate),
}

impl InboundEvent {
    /// Returns the wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageError(_) => "message_error",
            Self::MessageReadUpdate(_) => "message_read_update",
        }
    }
}

/// Payload of [`InboundEvent::ReceiveMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessage {
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// The confirmed message.
    pub message: WireMessage,
}

/// Payload of [`InboundEvent::MessageError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    /// Human-readable reason.
    pub error: String,
}

/// Payload of [`InboundEvent::MessageReadUpdate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadUpdate {
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Message whose read state changed.
    pub message_id: MessageId,
    /// Full reader set as known by the server.
    pub read_by: Vec<UserRef>,
}
