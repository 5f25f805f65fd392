//! Ordered, duplicate-free message timeline of the active conversation.
//!
//! Entries appear in arrival order. Optimistic placeholders are resolved in
//! place when their confirmation arrives, so a sent message never moves and
//! never shows up twice. Reader sets only grow: every merge is a union.

use std::collections::HashSet;

use pairchat_proto::conversation::ChatId;
use pairchat_proto::message::MessageId;
use pairchat_proto::user::UserId;

use super::model::Message;

/// What [`MessageTimeline::reconcile`] did with an incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// An existing entry at `index` was replaced.
    Replaced {
        /// Position of the entry.
        index: usize,
        /// Whether the replaced entry was an optimistic placeholder.
        was_optimistic: bool,
    },
    /// The message was new and appended at `index`.
    Appended {
        /// Position of the entry.
        index: usize,
    },
}

impl Reconciled {
    /// Position of the affected entry.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Replaced { index, .. } | Self::Appended { index } => index,
        }
    }
}

/// Messages of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageTimeline {
    conversation_id: Option<ChatId>,
    messages: Vec<Message>,
}

impl MessageTimeline {
    /// An empty timeline bound to `conversation_id`.
    #[must_use]
    pub const fn new(conversation_id: ChatId) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            messages: Vec::new(),
        }
    }

    /// The conversation this timeline shows, if any.
    #[must_use]
    pub const fn conversation_id(&self) -> Option<&ChatId> {
        self.conversation_id.as_ref()
    }

    /// Entries in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Looks up an entry by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Number of unresolved placeholders.
    #[must_use]
    pub fn optimistic_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_optimistic).count()
    }

    /// Appends a placeholder for a message just sent.
    pub fn push_optimistic(&mut self, message: Message) {
        debug_assert!(message.is_optimistic);
        self.messages.push(message);
    }

    /// Merges a confirmed message into the timeline.
    ///
    /// The first entry matching in this order is replaced in place:
    /// 1. an optimistic entry carrying the same client token
    /// 2. any entry with the same id
    /// 3. an optimistic entry from the same sender with equal content, only
    ///    when the incoming message carries no token
    ///
    /// Otherwise the message is appended. Applying the same message twice
    /// leaves the timeline unchanged after the first application.
    pub fn reconcile(&mut self, incoming: Message) -> Reconciled {
        match self.find_match(&incoming) {
            Some(index) => {
                let slot = &mut self.messages[index];
                let was_optimistic = slot.is_optimistic;
                let mut merged = incoming;
                merged.read_by.extend(std::mem::take(&mut slot.read_by));
                if merged.client_token.is_none() {
                    merged.client_token = slot.client_token.take();
                }
                if merged.sender_name.is_none() {
                    merged.sender_name = slot.sender_name.take();
                }
                merged.is_optimistic = false;
                *slot = merged;
                Reconciled::Replaced {
                    index,
                    was_optimistic,
                }
            }
            None => {
                self.messages.push(Message {
                    is_optimistic: false,
                    ..incoming
                });
                Reconciled::Appended {
                    index: self.messages.len() - 1,
                }
            }
        }
    }

    fn find_match(&self, incoming: &Message) -> Option<usize> {
        if let Some(token) = &incoming.client_token {
            let by_token = self
                .messages
                .iter()
                .position(|m| m.is_optimistic && m.client_token.as_ref() == Some(token));
            if by_token.is_some() {
                return by_token;
            }
        }
        if let Some(index) = self.messages.iter().position(|m| m.id == incoming.id) {
            return Some(index);
        }
        if incoming.client_token.is_some() {
            return None;
        }
        self.messages.iter().position(|m| {
            m.is_optimistic && m.sender_id == incoming.sender_id && m.content == incoming.content
        })
    }

    /// Drops every optimistic entry. Returns how many were removed.
    pub fn purge_optimistic(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|m| !m.is_optimistic);
        before - self.messages.len()
    }

    /// Merges an authoritative reader set into message `id`.
    ///
    /// Returns `false` when the message is not in the timeline.
    pub fn apply_read_update(
        &mut self,
        id: &MessageId,
        readers: impl IntoIterator<Item = UserId>,
    ) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            return false;
        };
        message.read_by.extend(readers);
        true
    }

    /// Records that `reader` read message `id`.
    ///
    /// Returns `true` if the reader set changed.
    pub fn mark_read_locally(&mut self, id: &MessageId, reader: &UserId) -> bool {
        self.messages
            .iter_mut()
            .find(|m| &m.id == id)
            .is_some_and(|m| m.read_by.insert(reader.clone()))
    }

    /// Replaces the whole timeline with fetched history.
    ///
    /// Duplicate ids in the history keep their first occurrence.
    pub fn replace_history(&mut self, conversation_id: ChatId, history: Vec<Message>) {
        let mut seen = HashSet::new();
        self.messages = history
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        self.conversation_id = Some(conversation_id);
    }

    /// Rebuilds the timeline from re-fetched history after a reconnect.
    ///
    /// Known messages keep the readers they already had. Placeholders that
    /// the history does not account for stay at the end, still optimistic.
    /// A placeholder is accounted for by a history entry echoing its token,
    /// or else by a previously unseen, tokenless entry from the same sender
    /// with the same content. An entry carrying a token is only ever claimed
    /// by the placeholder with that token.
    pub fn resync(&mut self, history: Vec<Message>) {
        let Some(conversation_id) = self.conversation_id.clone() else {
            return;
        };
        let old = std::mem::take(&mut self.messages);
        self.replace_history(conversation_id, history);

        let known: HashSet<&MessageId> = old
            .iter()
            .filter(|m| !m.is_optimistic)
            .map(|m| &m.id)
            .collect();
        for prior in old.iter().filter(|m| !m.is_optimistic) {
            if let Some(current) = self.messages.iter_mut().find(|m| m.id == prior.id) {
                current.read_by.extend(prior.read_by.iter().cloned());
            }
        }

        let placeholders: Vec<&Message> = old.iter().filter(|m| m.is_optimistic).collect();
        let mut claimed = vec![false; self.messages.len()];
        let mut resolved = vec![false; placeholders.len()];

        for (p, prior) in placeholders.iter().enumerate() {
            let Some(token) = &prior.client_token else {
                continue;
            };
            if let Some(i) = self
                .messages
                .iter()
                .position(|m| m.client_token.as_ref() == Some(token))
            {
                claimed[i] = true;
                resolved[p] = true;
            }
        }
        let fetched = claimed.len();
        for (p, prior) in placeholders.iter().enumerate() {
            if resolved[p] {
                continue;
            }
            let slot = self.messages[..fetched].iter().enumerate().position(|(i, m)| {
                !claimed[i]
                    && m.client_token.is_none()
                    && !known.contains(&m.id)
                    && m.sender_id == prior.sender_id
                    && m.content == prior.content
            });
            match slot {
                Some(i) => claimed[i] = true,
                None => self.messages.push((*prior).clone()),
            }
        }
    }

    /// Confirmed messages from someone other than `me` that `me` has not
    /// read, oldest first.
    #[must_use]
    pub fn unread_incoming(&self, me: &UserId) -> Vec<MessageId> {
        self.messages
            .iter()
            .filter(|m| !m.is_optimistic && !m.is_from(me) && !m.is_read_by(me))
            .map(|m| m.id.clone())
            .collect()
    }

    /// Drops all entries and the conversation binding.
    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.messages.clear();
    }
}
