//! In-memory [`ChatService`] for tests.
//!
//! Holds a fixed directory of users and a mutable set of conversations seen
//! from one signed-in user. Failures can be switched on to exercise error
//! paths, and every durable mark-read call is recorded with its arrival
//! time so that pacing can be asserted under a paused clock.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::Instant;

use pairchat_proto::conversation::{ChatId, WireConversation};
use pairchat_proto::message::{MessageId, WireMessage};
use pairchat_proto::user::{UserId, UserProfile, UserRef};

use super::{ChatService, ServiceError};

#[derive(Default)]
struct State {
    users: Vec<UserProfile>,
    conversations: Vec<WireConversation>,
    mark_read_calls: Vec<(ChatId, MessageId, Instant)>,
    unauthorized: bool,
    fail_history: bool,
    next_chat: u32,
}

/// Cloneable handle onto a shared in-memory store.
#[derive(Clone)]
pub struct InMemoryChatService {
    me: UserProfile,
    state: Arc<Mutex<State>>,
}

impl InMemoryChatService {
    /// A store seen by `me`, who can find every user in `directory`.
    #[must_use]
    pub fn new(me: UserProfile, directory: Vec<UserProfile>) -> Self {
        Self {
            me,
            state: Arc::new(Mutex::new(State {
                users: directory,
                ..State::default()
            })),
        }
    }

    /// Adds a conversation, replacing any with the same id.
    pub fn insert_conversation(&self, conversation: WireConversation) {
        let mut state = self.state.lock();
        state.conversations.retain(|c| c.id != conversation.id);
        state.conversations.push(conversation);
    }

    /// Appends a message to a stored conversation's history.
    pub fn append_message(&self, chat: &ChatId, message: WireMessage) {
        let mut state = self.state.lock();
        if let Some(conv) = state.conversations.iter_mut().find(|c| &c.id == chat) {
            conv.messages.push(message);
        }
    }

    /// Makes every operation fail with [`ServiceError::Unauthorized`].
    pub fn set_unauthorized(&self, on: bool) {
        self.state.lock().unauthorized = on;
    }

    /// Makes [`ChatService::get_conversation`] fail with a server error.
    pub fn set_fail_history(&self, on: bool) {
        self.state.lock().fail_history = on;
    }

    /// Durable mark-read calls seen so far.
    #[must_use]
    pub fn mark_read_calls(&self) -> Vec<(ChatId, MessageId)> {
        self.state
            .lock()
            .mark_read_calls
            .iter()
            .map(|(c, m, _)| (c.clone(), m.clone()))
            .collect()
    }

    /// Arrival times of the durable mark-read calls.
    #[must_use]
    pub fn mark_read_times(&self) -> Vec<Instant> {
        self.state
            .lock()
            .mark_read_calls
            .iter()
            .map(|(_, _, at)| *at)
            .collect()
    }

    fn check_auth(&self) -> Result<(), ServiceError> {
        if self.state.lock().unauthorized {
            return Err(ServiceError::Unauthorized);
        }
        Ok(())
    }
}

impl ChatService for InMemoryChatService {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ServiceError> {
        self.check_auth()?;
        let state = self.state.lock();
        Ok(state
            .conversations
            .iter()
            .filter(|c| c.participants.iter().any(|p| p.id == self.me.id))
            .cloned()
            .collect())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, ServiceError> {
        self.check_auth()?;
        let needle = query.to_lowercase();
        let state = self.state.lock();
        Ok(state
            .users
            .iter()
            .filter(|u| u.id != self.me.id && u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }

    async fn create_or_get(&self, user: &UserId) -> Result<WireConversation, ServiceError> {
        self.check_auth()?;
        let mut state = self.state.lock();
        let existing = state.conversations.iter().find(|c| {
            c.participants.iter().any(|p| p.id == self.me.id)
                && c.participants.iter().any(|p| &p.id == user)
        });
        if let Some(conv) = existing {
            return Ok(conv.clone());
        }
        let other = state
            .users
            .iter()
            .find(|u| &u.id == user)
            .cloned()
            .ok_or(ServiceError::Status(404))?;
        state.next_chat += 1;
        let conv = WireConversation {
            id: ChatId::new(format!("chat-{}", state.next_chat)),
            participants: vec![self.me.clone(), other],
            messages: Vec::new(),
        };
        state.conversations.push(conv.clone());
        Ok(conv)
    }

    async fn get_conversation(&self, id: &ChatId) -> Result<WireConversation, ServiceError> {
        self.check_auth()?;
        let state = self.state.lock();
        if state.fail_history {
            return Err(ServiceError::Status(500));
        }
        state
            .conversations
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or(ServiceError::Status(404))
    }

    async fn mark_message_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
    ) -> Result<(), ServiceError> {
        self.check_auth()?;
        let mut state = self.state.lock();
        state
            .mark_read_calls
            .push((chat.clone(), message.clone(), Instant::now()));
        let me = self.me.id.clone();
        if let Some(msg) = state
            .conversations
            .iter_mut()
            .filter(|c| &c.id == chat)
            .flat_map(|c| c.messages.iter_mut())
            .find(|m| &m.id == message)
        {
            if !msg.read_by.iter().any(|r| r.id() == &me) {
                msg.read_by.push(UserRef::Id(me));
            }
        }
        Ok(())
    }
}
