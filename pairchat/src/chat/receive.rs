//! Inbound handling for [`ChatSurface`].
//!
//! Channel events are applied to the active timeline when they concern it;
//! every `receive_message` also refreshes the conversation list, whichever
//! conversation it belongs to. Connectivity changes drive a full resync of
//! the active conversation once the channel is back.

use pairchat_proto::event::{InboundEvent, ReadUpdate, ReceiveMessage};

use crate::channel::{ChannelNotice, Connector};
use crate::service::ChatService;

use super::model::Message;
use super::receipts::AckDispatched;
use super::{ChatError, ChatSurface, SurfaceEvent};

impl<C: Connector, S: ChatService + 'static> ChatSurface<C, S> {
    /// Applies one channel notice.
    ///
    /// # Errors
    ///
    /// - [`ChatError::Transport`] for a `message_error` push, after the
    ///   placeholders have been purged.
    /// - Request errors of the list refresh or resync fetch.
    pub async fn handle_notice(&mut self, notice: ChannelNotice) -> Result<(), ChatError> {
        match notice {
            ChannelNotice::Event(InboundEvent::ReceiveMessage(event)) => {
                self.on_receive(event);
                self.refresh_list().await
            }
            ChannelNotice::Event(InboundEvent::MessageError(event)) => {
                Err(self.fail_send(event.error))
            }
            ChannelNotice::Event(InboundEvent::MessageReadUpdate(update)) => {
                self.on_read_update(update);
                Ok(())
            }
            ChannelNotice::Disconnected => {
                if !self.disconnected {
                    self.disconnected = true;
                    tracing::info!("channel disconnected");
                    self.emit(SurfaceEvent::ConnectionChanged { connected: false });
                }
                Ok(())
            }
            ChannelNotice::Connected => {
                if !self.disconnected {
                    return Ok(());
                }
                self.disconnected = false;
                tracing::info!("channel reconnected, resyncing");
                self.emit(SurfaceEvent::ConnectionChanged { connected: true });
                self.resync().await
            }
        }
    }

    fn on_receive(&mut self, event: ReceiveMessage) {
        if !self.is_active(&event.chat_id) {
            tracing::debug!(chat_id = %event.chat_id, "message for inactive conversation");
            return;
        }
        let chat_id = event.chat_id.clone();
        let outcome = self
            .timeline
            .reconcile(Message::from_wire(event.chat_id, event.message));
        tracing::debug!(chat_id = %chat_id, ?outcome, "message reconciled");

        if let Some(outbox) = self.connection.outbox() {
            let entry = &self.timeline.messages()[outcome.index()];
            self.tracker.schedule_one(&outbox, entry);
        }
        self.emit(SurfaceEvent::TimelineChanged { chat_id });
    }

    fn on_read_update(&mut self, update: ReadUpdate) {
        if !self.is_active(&update.chat_id) {
            return;
        }
        let readers = update.read_by.iter().map(|r| r.id().clone());
        if self.timeline.apply_read_update(&update.message_id, readers) {
            self.emit(SurfaceEvent::TimelineChanged {
                chat_id: update.chat_id,
            });
        } else {
            tracing::debug!(message_id = %update.message_id, "read update for unknown message");
        }
    }

    /// Records a dispatched read acknowledgement in the timeline.
    pub fn handle_ack(&mut self, ack: &AckDispatched) {
        if !self.is_active(&ack.chat_id) {
            return;
        }
        if self
            .timeline
            .mark_read_locally(&ack.receipt.message_id, &ack.receipt.reader_id)
        {
            self.emit(SurfaceEvent::TimelineChanged {
                chat_id: ack.chat_id.clone(),
            });
        }
    }

    /// Re-joins the active room, re-fetches its history and the list.
    async fn resync(&mut self) -> Result<(), ChatError> {
        if let Some(active) = self.active.clone() {
            self.connection.join_conversation(&active.id)?;
            let conversation = self.service.get_conversation(&active.id).await?;
            let history = conversation
                .messages
                .into_iter()
                .map(|m| Message::from_wire(active.id.clone(), m))
                .collect();
            self.timeline.resync(history);
            if let Some(outbox) = self.connection.outbox() {
                self.tracker
                    .schedule_batch(&outbox, self.timeline.messages());
            }
            self.emit(SurfaceEvent::TimelineChanged { chat_id: active.id });
        }
        self.refresh_list().await
    }
}
