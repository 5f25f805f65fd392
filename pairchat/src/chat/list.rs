//! Conversation list shown next to the timeline.
//!
//! The list is never patched: every refresh replaces it with whatever the
//! server returned, in the server's order.

use pairchat_proto::conversation::{ChatId, WireConversation};
use pairchat_proto::user::{UserId, UserProfile};

/// Who wrote the last message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewAuthor {
    /// The session user.
    You,
    /// Someone else, by display name.
    Them(String),
}

/// Last message of a conversation, for the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub author: PreviewAuthor,
    pub content: String,
}

impl std::fmt::Display for Preview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.author {
            PreviewAuthor::You => write!(f, "You: {}", self.content),
            PreviewAuthor::Them(name) => write!(f, "{name}: {}", self.content),
        }
    }
}

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSummary {
    pub id: ChatId,
    pub other_participant: Option<UserProfile>,
    pub last_message: Option<Preview>,
}

impl ChatSummary {
    /// Summarizes `conversation` as seen by `me`.
    #[must_use]
    pub fn from_wire(conversation: &WireConversation, me: &UserId) -> Self {
        let other = conversation.other_participant(me).cloned();
        let last_message = conversation.messages.last().map(|m| {
            let author = if m.sender.id() == me {
                PreviewAuthor::You
            } else {
                let name = m
                    .sender
                    .username()
                    .map(str::to_string)
                    .or_else(|| other.as_ref().map(|o| o.username.clone()))
                    .unwrap_or_else(|| m.sender.id().to_string());
                PreviewAuthor::Them(name)
            };
            Preview {
                author,
                content: m.content.clone(),
            }
        });
        Self {
            id: conversation.id.clone(),
            other_participant: other,
            last_message,
        }
    }

    /// Display name of the other participant, or the conversation id.
    #[must_use]
    pub fn title(&self) -> &str {
        self.other_participant
            .as_ref()
            .map_or_else(|| self.id.as_str(), |p| p.username.as_str())
    }
}

/// The conversation list of the session user.
#[derive(Debug, Default)]
pub struct ChatListStore {
    conversations: Vec<WireConversation>,
    summaries: Vec<ChatSummary>,
}

impl ChatListStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole list with a fresh server response.
    pub fn replace(&mut self, conversations: Vec<WireConversation>, me: &UserId) {
        self.summaries = conversations
            .iter()
            .map(|c| ChatSummary::from_wire(c, me))
            .collect();
        self.conversations = conversations;
    }

    /// Rows in server order.
    #[must_use]
    pub fn summaries(&self) -> &[ChatSummary] {
        &self.summaries
    }

    /// The raw conversation with `id`, if listed.
    #[must_use]
    pub fn get(&self, id: &ChatId) -> Option<&WireConversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// The conversation at list position `index`.
    #[must_use]
    pub fn nth(&self, index: usize) -> Option<&WireConversation> {
        self.conversations.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
