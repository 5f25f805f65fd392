//! Search and conversation selection for [`ChatSurface`].

use pairchat_proto::conversation::ChatId;
use pairchat_proto::user::{UserId, UserProfile};

use crate::channel::Connector;
use crate::service::ChatService;

use super::model::Message;
use super::timeline::MessageTimeline;
use super::{ActiveConversation, ChatError, ChatSurface, SurfaceEvent};

impl<C: Connector, S: ChatService + 'static> ChatSurface<C, S> {
    /// Searches users by name. Results are kept apart from the
    /// conversation list. A blank query does nothing.
    ///
    /// # Errors
    ///
    /// Returns the request error; previous results are kept.
    pub async fn search(&mut self, query: &str) -> Result<(), ChatError> {
        let query = query.trim();
        if query.is_empty() {
            tracing::debug!("blank search ignored");
            return Ok(());
        }
        self.me()?;
        let results = self.service.search_users(query).await?;
        tracing::debug!(query, hits = results.len(), "user search");
        self.search_results = results;
        self.emit(SurfaceEvent::SearchUpdated);
        Ok(())
    }

    /// Opens the conversation with `user`, creating it if needed, and
    /// clears the search results.
    ///
    /// # Errors
    ///
    /// Returns the create-or-get request error, or any error of
    /// [`select_conversation`](Self::select_conversation).
    pub async fn select_user(&mut self, user: &UserId) -> Result<(), ChatError> {
        let me = self.me()?.clone();
        let conversation = self.service.create_or_get(user).await?;
        self.search_results.clear();
        self.emit(SurfaceEvent::SearchUpdated);
        let other = conversation.other_participant(&me).cloned();
        self.open(conversation.id, other).await
    }

    /// Opens an existing conversation.
    ///
    /// # Errors
    ///
    /// [`ChatError::Channel`] if the room cannot be joined, or the history
    /// request error. After a history failure the conversation stays
    /// selected with an empty timeline.
    pub async fn select_conversation(&mut self, id: &ChatId) -> Result<(), ChatError> {
        let me = self.me()?.clone();
        let other = self
            .list
            .get(id)
            .and_then(|c| c.other_participant(&me))
            .cloned();
        self.open(id.clone(), other).await
    }

    async fn open(&mut self, id: ChatId, other: Option<UserProfile>) -> Result<(), ChatError> {
        let me = self.me()?.clone();

        self.tracker.begin(id.clone());
        if let Some(previous) = self.active.take() {
            if previous.id != id {
                if let Err(e) = self.connection.leave_conversation(&previous.id) {
                    tracing::debug!(chat_id = %previous.id, err = %e, "leave failed");
                }
            }
        }
        self.timeline.clear();
        self.connection.join_conversation(&id)?;
        self.active = Some(ActiveConversation {
            id: id.clone(),
            other,
        });
        self.timeline = MessageTimeline::new(id.clone());
        self.emit(SurfaceEvent::ConversationOpened {
            chat_id: id.clone(),
        });
        tracing::info!(chat_id = %id, "conversation opened");

        let conversation = self.service.get_conversation(&id).await?;
        if let Some(active) = self.active.as_mut() {
            if let Some(other) = conversation.other_participant(&me) {
                active.other = Some(other.clone());
            }
        }
        let history = conversation
            .messages
            .into_iter()
            .map(|m| Message::from_wire(id.clone(), m))
            .collect();
        self.timeline.replace_history(id.clone(), history);

        if let Some(outbox) = self.connection.outbox() {
            self.tracker.schedule_batch(&outbox, self.timeline.messages());
        }
        self.emit(SurfaceEvent::TimelineChanged { chat_id: id });
        Ok(())
    }
}
