//! Optimistic send pipeline for [`ChatSurface`].
//!
//! A send appends a placeholder right away, clears the input and emits
//! `send_message` without waiting for anything. The placeholder is resolved
//! later when the server's `receive_message` echo comes back. If the emit
//! fails locally, every placeholder of the active conversation is purged
//! and the failure is reported once. There is no automatic resend.

use pairchat_proto::event::{OutboundEvent, SendMessage};
use pairchat_proto::message::{ClientToken, MAX_CONTENT_SIZE, MessageId};

use crate::channel::Connector;
use crate::service::ChatService;

use super::model::Message;
use super::{ChatError, ChatSurface, SurfaceEvent};

impl<C: Connector, S: ChatService + 'static> ChatSurface<C, S> {
    /// Sends the input buffer.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn submit_input(&mut self) -> Result<Option<MessageId>, ChatError> {
        let text = self.input.clone();
        self.send(&text)
    }

    /// Sends `text` to the other participant of the active conversation.
    ///
    /// Returns the placeholder's id, or `None` when there was nothing to do
    /// (blank text, no conversation, no other participant, no session).
    ///
    /// # Errors
    ///
    /// [`ChatError::Transport`] if the event could not be emitted; all
    /// placeholders have been purged by then.
    pub fn send(&mut self, text: &str) -> Result<Option<MessageId>, ChatError> {
        match self.dispatch_send(text) {
            Err(ChatError::Validation(reason)) => {
                tracing::debug!(reason, "send ignored");
                Ok(None)
            }
            other => other.map(Some),
        }
    }

    fn dispatch_send(&mut self, text: &str) -> Result<MessageId, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::Validation("blank message"));
        }
        if text.len() > MAX_CONTENT_SIZE {
            return Err(ChatError::Validation("message too large"));
        }
        let me = self
            .me()
            .map_err(|_| ChatError::Validation("no session"))?
            .clone();
        let active = self
            .active
            .as_ref()
            .ok_or(ChatError::Validation("no conversation selected"))?;
        let receiver = active
            .other
            .as_ref()
            .ok_or(ChatError::Validation("conversation has no other participant"))?
            .id
            .clone();
        let chat_id = active.id.clone();

        let token = ClientToken::generate();
        let placeholder =
            Message::optimistic(chat_id.clone(), me.clone(), text.to_string(), token.clone());
        let id = placeholder.id.clone();
        self.timeline.push_optimistic(placeholder);
        self.input.clear();
        self.emit(SurfaceEvent::TimelineChanged {
            chat_id: chat_id.clone(),
        });

        let event = OutboundEvent::SendMessage(SendMessage {
            chat_id: chat_id.clone(),
            message: text.to_string(),
            sender_id: me,
            receiver_id: receiver,
            client_id: Some(token),
        });
        if let Err(e) = self.connection.emit(event) {
            return Err(self.fail_send(e.to_string()));
        }
        tracing::debug!(chat_id = %chat_id, message_id = %id, "message sent optimistically");
        Ok(id)
    }

    /// Purges every placeholder of the active conversation after a failed
    /// send. Returns the error to report.
    pub(super) fn fail_send(&mut self, reason: String) -> ChatError {
        let purged = self.timeline.purge_optimistic();
        tracing::warn!(purged, reason = %reason, "send failed, placeholders purged");
        if purged > 0 {
            if let Some(chat_id) = self.timeline.conversation_id().cloned() {
                self.emit(SurfaceEvent::TimelineChanged { chat_id });
            }
        }
        ChatError::Transport(reason)
    }
}
