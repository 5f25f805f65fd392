//! Request API for durable chat state.
//!
//! The push channel only carries live events; listing conversations,
//! searching users, fetching history and the durable half of a read
//! acknowledgement go through a [`ChatService`]. Implementations:
//! - [`http::HttpChatService`] against the server's REST endpoints
//! - [`memory::InMemoryChatService`] for tests

pub mod http;
pub mod memory;

use pairchat_proto::conversation::{ChatId, WireConversation};
use pairchat_proto::message::MessageId;
use pairchat_proto::user::{UserId, UserProfile};

/// Errors returned by [`ChatService`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The bearer token was rejected; the session is over.
    #[error("session is no longer authorized")]
    Unauthorized,

    /// The server answered with a non-success status.
    #[error("request failed with status {0}")]
    Status(u16),

    /// The request could not be sent or its body could not be decoded.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// An endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    Url(#[from] url::ParseError),
}

impl ServiceError {
    /// Whether this error means the session must be torn down.
    #[must_use]
    pub const fn is_auth_expiry(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Async request API used by the chat surface.
///
/// Every operation is authenticated with the session's bearer token.
pub trait ChatService: Send + Sync {
    /// Conversations of the session user, in server order.
    fn list_conversations(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WireConversation>, ServiceError>> + Send;

    /// Users whose name matches `query`.
    fn search_users(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Vec<UserProfile>, ServiceError>> + Send;

    /// The conversation with `user`, created if it does not exist yet.
    fn create_or_get(
        &self,
        user: &UserId,
    ) -> impl std::future::Future<Output = Result<WireConversation, ServiceError>> + Send;

    /// A conversation with its full message history.
    fn get_conversation(
        &self,
        id: &ChatId,
    ) -> impl std::future::Future<Output = Result<WireConversation, ServiceError>> + Send;

    /// Durably record that the session user read `message`.
    fn mark_message_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
    ) -> impl std::future::Future<Output = Result<(), ServiceError>> + Send;
}
