//! Loopback channel for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] queues to stand in for the server.
//! [`LoopbackConnector::create_pair`] returns the client-side connector plus
//! a [`LoopbackServer`] through which a test reads what the client emitted
//! and pushes inbound events or connectivity changes back.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use pairchat_proto::event::{InboundEvent, OutboundEvent};

use super::{ChannelError, ChannelHandle, ChannelNotice, Connector, Outbox};
use crate::session::Session;

/// Client-side parts waiting to be claimed by the first `connect`.
struct Pending {
    outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
    notices_rx: mpsc::Receiver<ChannelNotice>,
}

/// In-process [`Connector`] paired with a [`LoopbackServer`].
///
/// Only one channel can be opened per pair; later connects fail with
/// [`ChannelError::Unreachable`].
#[derive(Clone)]
pub struct LoopbackConnector {
    pending: Arc<Mutex<Option<Pending>>>,
}

impl LoopbackConnector {
    /// Create a connected connector/server pair.
    ///
    /// `buffer` bounds the notice queue toward the client.
    #[must_use]
    pub fn create_pair(buffer: usize) -> (Self, LoopbackServer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::channel(buffer);

        let connector = Self {
            pending: Arc::new(Mutex::new(Some(Pending {
                outbound_tx,
                notices_rx,
            }))),
        };
        let server = LoopbackServer {
            outbound: outbound_rx,
            notices: notices_tx,
        };
        (connector, server)
    }
}

impl Connector for LoopbackConnector {
    async fn connect(&self, session: &Session) -> Result<ChannelHandle, ChannelError> {
        let pending = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| ChannelError::Unreachable("loopback".into()))?;
        tracing::debug!(user_id = %session.user_id(), "loopback channel opened");
        Ok(ChannelHandle::new(
            Outbox::new(pending.outbound_tx),
            pending.notices_rx,
            None,
            None,
        ))
    }
}

/// Server side of a loopback channel.
pub struct LoopbackServer {
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    notices: mpsc::Sender<ChannelNotice>,
}

impl LoopbackServer {
    /// Waits for the next event the client emitted.
    ///
    /// Returns `None` once the client side has been closed.
    pub async fn next_outbound(&mut self) -> Option<OutboundEvent> {
        self.outbound.recv().await
    }

    /// Returns an already-emitted event without waiting.
    pub fn try_next_outbound(&mut self) -> Option<OutboundEvent> {
        self.outbound.try_recv().ok()
    }

    /// Drains every event emitted so far.
    pub fn drain_outbound(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound.try_recv() {
            events.push(event);
        }
        events
    }

    /// Pushes an inbound event to the client.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the client side is gone.
    pub async fn push(&self, event: InboundEvent) -> Result<(), ChannelError> {
        self.notify(ChannelNotice::Event(event)).await
    }

    /// Delivers a raw notice, e.g. to simulate a reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the client side is gone.
    pub async fn notify(&self, notice: ChannelNotice) -> Result<(), ChannelError> {
        self.notices
            .send(notice)
            .await
            .map_err(|_| ChannelError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_proto::conversation::ChatId;
    use pairchat_proto::event::MessageError;
    use pairchat_proto::user::UserId;

    fn session() -> Session {
        Session::new(UserId::new("u-1"), "token")
    }

    #[tokio::test]
    async fn emitted_events_reach_server_in_order() {
        let (connector, mut server) = LoopbackConnector::create_pair(8);
        let handle = connector.connect(&session()).await.unwrap();

        for id in ["c-1", "c-2", "c-3"] {
            handle
                .outbox()
                .emit(OutboundEvent::JoinNewChat(ChatId::new(id)))
                .unwrap();
        }

        let seen = server.drain_outbound();
        assert_eq!(
            seen,
            vec![
                OutboundEvent::JoinNewChat(ChatId::new("c-1")),
                OutboundEvent::JoinNewChat(ChatId::new("c-2")),
                OutboundEvent::JoinNewChat(ChatId::new("c-3")),
            ]
        );
    }

    #[tokio::test]
    async fn pushed_events_arrive_as_notices() {
        let (connector, server) = LoopbackConnector::create_pair(8);
        let mut handle = connector.connect(&session()).await.unwrap();

        let event = InboundEvent::MessageError(MessageError {
            error: "boom".into(),
        });
        server.push(event.clone()).await.unwrap();
        server.notify(ChannelNotice::Disconnected).await.unwrap();

        assert_eq!(handle.recv().await, Some(ChannelNotice::Event(event)));
        assert_eq!(handle.recv().await, Some(ChannelNotice::Disconnected));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (connector, _server) = LoopbackConnector::create_pair(8);
        let _first = connector.connect(&session()).await.unwrap();
        let second = connector.connect(&session()).await;
        assert!(matches!(second, Err(ChannelError::Unreachable(_))));
    }

    #[tokio::test]
    async fn dropping_handle_ends_server_stream() {
        let (connector, mut server) = LoopbackConnector::create_pair(8);
        let handle = connector.connect(&session()).await.unwrap();
        drop(handle);
        assert_eq!(server.next_outbound().await, None);
    }
}
