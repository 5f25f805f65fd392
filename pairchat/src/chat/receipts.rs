//! Read-receipt scheduling.
//!
//! Acknowledging a message takes two paths: an immediate `message_read`
//! push so the sender sees the receipt quickly, then after
//! [`Pacing::read_confirm_delay`] a durable
//! [`ChatService::mark_message_read`] request. When a conversation is
//! opened with a backlog of unread messages, acknowledgements are staggered
//! by [`Pacing::ack_pacing`] per message.
//!
//! Every timer belongs to the conversation context that scheduled it and is
//! aborted when the context changes or the tracker is dropped. Timers never
//! touch timeline state; they send [`ReceiptReport`]s to the owning event
//! loop instead: one once the push has gone out, and one if the durable
//! request finds the session's credentials rejected.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pairchat_proto::conversation::ChatId;
use pairchat_proto::event::{MessageRead, OutboundEvent};
use pairchat_proto::message::MessageId;
use pairchat_proto::user::UserId;

use super::model::{Message, ReadReceipt};
use crate::channel::Outbox;
use crate::service::ChatService;

/// Timer settings for acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Gap between consecutive acknowledgements of a backlog.
    pub ack_pacing: Duration,
    /// Delay between the push acknowledgement and the durable request.
    pub read_confirm_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            ack_pacing: Duration::from_millis(300),
            read_confirm_delay: Duration::from_millis(500),
        }
    }
}

/// Reported once the push acknowledgement for a message has been emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckDispatched {
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// The acknowledgement that went out.
    pub receipt: ReadReceipt,
}

/// What an acknowledgement timer reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptReport {
    /// The push acknowledgement went out.
    Dispatched(AckDispatched),
    /// The durable request was refused because the session expired.
    AuthExpired,
}

/// Owns the acknowledgement timers of the active conversation.
pub struct ReadReceiptTracker<S> {
    service: Arc<S>,
    pacing: Pacing,
    reader: UserId,
    context: Option<ChatId>,
    scheduled: HashSet<MessageId>,
    tasks: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedSender<ReceiptReport>,
}

impl<S: ChatService + 'static> ReadReceiptTracker<S> {
    /// Creates a tracker acknowledging on behalf of `reader`.
    ///
    /// Returns the tracker and the receiver of its [`ReceiptReport`]s.
    pub fn new(
        service: Arc<S>,
        reader: UserId,
        pacing: Pacing,
    ) -> (Self, mpsc::UnboundedReceiver<ReceiptReport>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let tracker = Self {
            service,
            pacing,
            reader,
            context: None,
            scheduled: HashSet::new(),
            tasks: Vec::new(),
            events,
        };
        (tracker, events_rx)
    }

    /// Starts a new conversation context, cancelling everything pending.
    pub fn begin(&mut self, chat: ChatId) {
        self.cancel_all();
        self.scheduled.clear();
        self.context = Some(chat);
    }

    /// Cancels all pending timers and forgets the context.
    pub fn end(&mut self) {
        self.cancel_all();
        self.scheduled.clear();
        self.context = None;
    }

    /// The conversation timers are currently scheduled for.
    #[must_use]
    pub const fn context(&self) -> Option<&ChatId> {
        self.context.as_ref()
    }

    /// Whether `message` warrants an acknowledgement right now.
    fn wants(&self, message: &Message) -> bool {
        self.context.as_ref() == Some(&message.conversation_id)
            && !message.is_optimistic
            && !message.is_from(&self.reader)
            && !message.is_read_by(&self.reader)
            && !self.scheduled.contains(&message.id)
    }

    /// Schedules acknowledgements for every unread incoming message in
    /// `messages`, the n-th one delayed by n × `ack_pacing`.
    ///
    /// Returns how many were scheduled.
    pub fn schedule_batch<'a>(
        &mut self,
        outbox: &Outbox,
        messages: impl IntoIterator<Item = &'a Message>,
    ) -> usize {
        let due: Vec<MessageId> = messages
            .into_iter()
            .filter(|m| self.wants(m))
            .map(|m| m.id.clone())
            .collect();
        let mut offset = Duration::ZERO;
        for id in &due {
            self.spawn(outbox, id.clone(), offset);
            offset += self.pacing.ack_pacing;
        }
        if !due.is_empty() {
            tracing::debug!(count = due.len(), "scheduled read acknowledgements");
        }
        due.len()
    }

    /// Schedules an immediate acknowledgement for one message.
    ///
    /// Returns `false` when the message is not eligible: it is our own,
    /// already read, still optimistic, from another conversation, or was
    /// scheduled before in this context.
    pub fn schedule_one(&mut self, outbox: &Outbox, message: &Message) -> bool {
        if !self.wants(message) {
            return false;
        }
        self.spawn(outbox, message.id.clone(), Duration::ZERO);
        true
    }

    fn spawn(&mut self, outbox: &Outbox, message_id: MessageId, offset: Duration) {
        let Some(chat_id) = self.context.clone() else {
            return;
        };
        self.tasks.retain(|t| !t.is_finished());
        self.scheduled.insert(message_id.clone());

        let outbox = outbox.clone();
        let events = self.events.clone();
        let service = Arc::clone(&self.service);
        let reader_id = self.reader.clone();
        let confirm_delay = self.pacing.read_confirm_delay;

        self.tasks.push(tokio::spawn(async move {
            if !offset.is_zero() {
                tokio::time::sleep(offset).await;
            }
            let push = OutboundEvent::MessageRead(MessageRead {
                chat_id: chat_id.clone(),
                message_id: message_id.clone(),
                reader_id: reader_id.clone(),
            });
            if let Err(e) = outbox.emit(push) {
                tracing::debug!(message_id = %message_id, err = %e, "read push not sent");
                return;
            }
            let _ = events.send(ReceiptReport::Dispatched(AckDispatched {
                chat_id: chat_id.clone(),
                receipt: ReadReceipt {
                    message_id: message_id.clone(),
                    reader_id,
                    timestamp: Utc::now(),
                },
            }));

            tokio::time::sleep(confirm_delay).await;
            if let Err(e) = service.mark_message_read(&chat_id, &message_id).await {
                if e.is_auth_expiry() {
                    let _ = events.send(ReceiptReport::AuthExpired);
                    return;
                }
                tracing::warn!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    err = %e,
                    "durable read confirmation failed"
                );
            }
        }));
    }

    /// Aborts every pending timer. Returns how many were still running.
    pub fn cancel_all(&mut self) -> usize {
        let mut aborted = 0;
        for task in self.tasks.drain(..) {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            tracing::debug!(aborted, "cancelled read acknowledgements");
        }
        aborted
    }

    /// Number of timers that have not finished yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_finished()).count()
    }

    /// Whether `id` was scheduled in the current context.
    #[must_use]
    pub fn is_scheduled(&self, id: &MessageId) -> bool {
        self.scheduled.contains(id)
    }
}

impl<S> Drop for ReadReceiptTracker<S> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
