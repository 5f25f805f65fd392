//! Shared server state: user directory, conversations and live connections.
//!
//! Everything is ephemeral and lost on restart. Conversations are always
//! between exactly two registered users; messages get server-assigned ids
//! in arrival order.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use pairchat_proto::conversation::{ChatId, WireConversation};
use pairchat_proto::message::{ClientToken, MAX_CONTENT_SIZE, MessageId, WireMessage};
use pairchat_proto::user::{UserId, UserProfile, UserRef};
use tokio::sync::{RwLock, mpsc};

/// Identifies one WebSocket connection.
pub type ConnId = u64;

/// Errors of directory operations. Each maps to one HTTP status.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StateError {
    /// No user with that id.
    #[error("user not found")]
    UnknownUser,
    /// No conversation with that id.
    #[error("conversation not found")]
    ChatNotFound,
    /// The caller is not one of the two participants.
    #[error("not a participant of this conversation")]
    NotParticipant,
    /// No message with that id in the conversation.
    #[error("message not found")]
    MessageNotFound,
    /// Conversations need two distinct users.
    #[error("cannot start a conversation with yourself")]
    SelfChat,
    /// Blank message content.
    #[error("message is empty")]
    EmptyMessage,
    /// Message content over the size limit.
    #[error("message too large: {size} bytes (max {MAX_CONTENT_SIZE})")]
    TooLarge {
        /// Actual content size.
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    sender: UserId,
    content: String,
    timestamp: DateTime<Utc>,
    read_by: Vec<UserId>,
    client_id: Option<ClientToken>,
}

impl StoredMessage {
    /// The bare-id shape pushed over the channel.
    fn to_push(&self) -> WireMessage {
        WireMessage {
            id: self.id.clone(),
            sender: UserRef::Id(self.sender.clone()),
            content: self.content.clone(),
            timestamp: self.timestamp,
            read_by: self.read_by.iter().cloned().map(UserRef::Id).collect(),
            client_id: self.client_id.clone(),
        }
    }
}

#[derive(Debug)]
struct StoredConversation {
    id: ChatId,
    participants: [UserId; 2],
    messages: Vec<StoredMessage>,
    last_activity: u64,
}

impl StoredConversation {
    fn has(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<UserId, UserProfile>,
    tokens: HashMap<String, UserId>,
    conversations: Vec<StoredConversation>,
    next_chat: u64,
    next_message: u64,
    clock: u64,
}

impl Directory {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn find(&self, id: &ChatId) -> Result<&StoredConversation, StateError> {
        self.conversations
            .iter()
            .find(|c| &c.id == id)
            .ok_or(StateError::ChatNotFound)
    }

    fn find_mut(&mut self, id: &ChatId) -> Result<&mut StoredConversation, StateError> {
        self.conversations
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or(StateError::ChatNotFound)
    }

    fn user_ref(&self, id: &UserId) -> UserRef {
        self.users
            .get(id)
            .map_or_else(|| UserRef::Id(id.clone()), |p| UserRef::Profile(p.clone()))
    }

    /// The populated shape returned by the request API.
    fn render(&self, conversation: &StoredConversation) -> WireConversation {
        WireConversation {
            id: conversation.id.clone(),
            participants: conversation
                .participants
                .iter()
                .map(|id| {
                    self.users
                        .get(id)
                        .cloned()
                        .unwrap_or_else(|| UserProfile::new(id.as_str(), ""))
                })
                .collect(),
            messages: conversation
                .messages
                .iter()
                .map(|m| WireMessage {
                    sender: self.user_ref(&m.sender),
                    ..m.to_push()
                })
                .collect(),
        }
    }
}

struct Connection {
    user: UserId,
    sender: mpsc::UnboundedSender<Message>,
    rooms: HashSet<ChatId>,
}

/// Shared server state behind every handler.
pub struct DevState {
    directory: RwLock<Directory>,
    connections: RwLock<HashMap<ConnId, Connection>>,
    next_conn: AtomicU64,
}

impl Default for DevState {
    fn default() -> Self {
        Self::new()
    }
}

impl DevState {
    /// Creates an empty state with no users.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: RwLock::new(Directory::default()),
            connections: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    /// Registers a user reachable with the bearer `token`.
    pub async fn add_user(&self, profile: UserProfile, token: impl Into<String>) {
        let mut dir = self.directory.write().await;
        dir.tokens.insert(token.into(), profile.id.clone());
        dir.users.insert(profile.id.clone(), profile);
    }

    /// Resolves a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> Option<UserId> {
        self.directory.read().await.tokens.get(token).cloned()
    }

    /// Forgets a token so that later requests with it are rejected.
    pub async fn revoke_token(&self, token: &str) -> bool {
        self.directory.write().await.tokens.remove(token).is_some()
    }

    /// Users whose name contains `query` (case-insensitive), excluding `me`.
    pub async fn search_users(&self, me: &UserId, query: &str) -> Vec<UserProfile> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let dir = self.directory.read().await;
        let mut hits: Vec<UserProfile> = dir
            .users
            .values()
            .filter(|u| &u.id != me && u.username.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.username.cmp(&b.username));
        hits
    }

    // -----------------------------------------------------------------------
    // Conversations
    // -----------------------------------------------------------------------

    /// Conversations of `me`, most recently active first.
    pub async fn conversations_for(&self, me: &UserId) -> Vec<WireConversation> {
        let dir = self.directory.read().await;
        let mut mine: Vec<&StoredConversation> =
            dir.conversations.iter().filter(|c| c.has(me)).collect();
        mine.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        mine.into_iter().map(|c| dir.render(c)).collect()
    }

    /// Returns the conversation between `me` and `other`, creating it on
    /// first use.
    ///
    /// # Errors
    ///
    /// [`StateError::SelfChat`] or [`StateError::UnknownUser`].
    pub async fn create_or_get(
        &self,
        me: &UserId,
        other: &UserId,
    ) -> Result<WireConversation, StateError> {
        if me == other {
            return Err(StateError::SelfChat);
        }
        let mut dir = self.directory.write().await;
        if !dir.users.contains_key(other) {
            return Err(StateError::UnknownUser);
        }
        if let Some(existing) = dir.conversations.iter().find(|c| c.has(me) && c.has(other)) {
            return Ok(dir.render(existing));
        }

        dir.next_chat += 1;
        let id = ChatId::new(format!("chat-{}", dir.next_chat));
        let last_activity = dir.tick();
        dir.conversations.push(StoredConversation {
            id: id.clone(),
            participants: [me.clone(), other.clone()],
            messages: Vec::new(),
            last_activity,
        });
        tracing::info!(chat_id = %id, a = %me, b = %other, "conversation created");
        let created = dir.find(&id)?;
        Ok(dir.render(created))
    }

    /// One conversation with its full history.
    ///
    /// # Errors
    ///
    /// [`StateError::ChatNotFound`] or [`StateError::NotParticipant`].
    pub async fn conversation(
        &self,
        me: &UserId,
        id: &ChatId,
    ) -> Result<WireConversation, StateError> {
        let dir = self.directory.read().await;
        let conversation = dir.find(id)?;
        if !conversation.has(me) {
            return Err(StateError::NotParticipant);
        }
        Ok(dir.render(conversation))
    }

    /// Whether `user` takes part in conversation `id`.
    pub async fn is_participant(&self, id: &ChatId, user: &UserId) -> bool {
        let dir = self.directory.read().await;
        dir.find(id).is_ok_and(|c| c.has(user))
    }

    /// Stores a message and returns it in push shape with both participants.
    ///
    /// # Errors
    ///
    /// Validation errors for the content, [`StateError::ChatNotFound`] or
    /// [`StateError::NotParticipant`].
    pub async fn append_message(
        &self,
        chat: &ChatId,
        sender: &UserId,
        content: &str,
        client_id: Option<ClientToken>,
    ) -> Result<(WireMessage, [UserId; 2]), StateError> {
        if content.trim().is_empty() {
            return Err(StateError::EmptyMessage);
        }
        if content.len() > MAX_CONTENT_SIZE {
            return Err(StateError::TooLarge {
                size: content.len(),
            });
        }

        let mut dir = self.directory.write().await;
        if !dir.find(chat)?.has(sender) {
            return Err(StateError::NotParticipant);
        }
        dir.next_message += 1;
        let id = MessageId::new(format!("m-{}", dir.next_message));
        let last_activity = dir.tick();

        let conversation = dir.find_mut(chat)?;
        let stored = StoredMessage {
            id,
            sender: sender.clone(),
            content: content.to_string(),
            timestamp: Utc::now(),
            read_by: Vec::new(),
            client_id,
        };
        let message = stored.to_push();
        conversation.messages.push(stored);
        conversation.last_activity = last_activity;
        Ok((message, conversation.participants.clone()))
    }

    /// Adds `reader` to a message's readers. Returns the full reader list
    /// and both participants. Idempotent.
    ///
    /// # Errors
    ///
    /// [`StateError::ChatNotFound`], [`StateError::NotParticipant`] or
    /// [`StateError::MessageNotFound`].
    pub async fn mark_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
        reader: &UserId,
    ) -> Result<(Vec<UserRef>, [UserId; 2]), StateError> {
        let mut dir = self.directory.write().await;
        let conversation = dir.find_mut(chat)?;
        if !conversation.has(reader) {
            return Err(StateError::NotParticipant);
        }
        let participants = conversation.participants.clone();
        let stored = conversation
            .messages
            .iter_mut()
            .find(|m| &m.id == message)
            .ok_or(StateError::MessageNotFound)?;
        if !stored.read_by.contains(reader) {
            stored.read_by.push(reader.clone());
        }
        let readers = stored.read_by.iter().cloned().map(UserRef::Id).collect();
        Ok((readers, participants))
    }

    // -----------------------------------------------------------------------
    // Connections
    // -----------------------------------------------------------------------

    /// Registers a live connection of `user`.
    pub async fn register(&self, user: UserId, sender: mpsc::UnboundedSender<Message>) -> ConnId {
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(
            id,
            Connection {
                user,
                sender,
                rooms: HashSet::new(),
            },
        );
        id
    }

    /// Removes a connection and its room memberships.
    pub async fn unregister(&self, conn: ConnId) -> bool {
        self.connections.write().await.remove(&conn).is_some()
    }

    /// Adds a connection to a conversation room.
    pub async fn join(&self, conn: ConnId, chat: ChatId) {
        if let Some(c) = self.connections.write().await.get_mut(&conn) {
            c.rooms.insert(chat);
        }
    }

    /// Removes a connection from a conversation room.
    pub async fn leave(&self, conn: ConnId, chat: &ChatId) {
        if let Some(c) = self.connections.write().await.get_mut(&conn) {
            c.rooms.remove(chat);
        }
    }

    /// Rooms joined by a connection, sorted.
    pub async fn rooms_of(&self, conn: ConnId) -> Vec<ChatId> {
        let conns = self.connections.read().await;
        let mut rooms: Vec<ChatId> = conns
            .get(&conn)
            .map(|c| c.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends a frame to one connection.
    pub async fn send_to(&self, conn: ConnId, frame: Message) {
        if let Some(c) = self.connections.read().await.get(&conn) {
            let _ = c.sender.send(frame);
        }
    }

    /// Sends a frame to every connection that joined `chat` or belongs to
    /// one of `participants`. Returns how many connections were reached.
    pub async fn deliver(&self, chat: &ChatId, participants: &[UserId], frame: &Message) -> usize {
        let conns = self.connections.read().await;
        let mut reached = 0;
        for (id, c) in conns.iter() {
            if c.rooms.contains(chat) || participants.contains(&c.user) {
                if c.sender.send(frame.clone()).is_ok() {
                    reached += 1;
                } else {
                    tracing::debug!(conn = id, "delivery to closed connection");
                }
            }
        }
        reached
    }

    /// Send a Close frame to all connected clients.
    ///
    /// Useful for graceful shutdown and for exercising client reconnects.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (id, c) in conns.iter() {
            tracing::info!(conn = id, user = %c.user, "sending close frame");
            let _ = c.sender.send(Message::Close(None));
        }
    }
}
