//! Session-scoped connection manager.
//!
//! Owns the single push channel of a session and the set of
//! conversation rooms it has joined. Everything the surface emits goes
//! through here or through an [`Outbox`] clone handed out by
//! [`ConnectionManager::outbox`].

use std::collections::BTreeSet;

use pairchat_proto::conversation::ChatId;
use pairchat_proto::event::OutboundEvent;

use crate::channel::{ChannelError, ChannelHandle, ChannelNotice, Connector, Outbox};
use crate::session::Session;

/// Owns one channel per session plus room membership.
pub struct ConnectionManager<C> {
    connector: C,
    channel: Option<ChannelHandle>,
    joined: BTreeSet<ChatId>,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager that opens channels through `connector`.
    pub const fn new(connector: C) -> Self {
        Self {
            connector,
            channel: None,
            joined: BTreeSet::new(),
        }
    }

    /// Establish the authenticated channel and announce the user.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::AlreadyOpen`] if a channel is already active.
    /// - Whatever the connector reports when the connection fails.
    pub async fn open(&mut self, session: &Session) -> Result<(), ChannelError> {
        if self.channel.is_some() {
            return Err(ChannelError::AlreadyOpen);
        }
        let handle = self.connector.connect(session).await?;
        handle
            .outbox()
            .emit(OutboundEvent::UserConnected(session.user_id().clone()))?;
        self.channel = Some(handle);
        tracing::info!(user_id = %session.user_id(), "session channel open");
        Ok(())
    }

    /// Whether a channel is currently held.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    /// A cloneable sender for timers that emit on their own.
    #[must_use]
    pub fn outbox(&self) -> Option<Outbox> {
        self.channel.as_ref().map(|c| c.outbox().clone())
    }

    /// Emit an arbitrary outbound event.
    ///
    /// # Errors
    ///
    /// [`ChannelError::NotOpen`] before [`open`](Self::open), or
    /// [`ChannelError::Closed`] if the backend has gone away.
    pub fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        self.channel
            .as_ref()
            .ok_or(ChannelError::NotOpen)?
            .outbox()
            .emit(event)
    }

    /// Enter the room of conversation `id`.
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub fn join_conversation(&mut self, id: &ChatId) -> Result<(), ChannelError> {
        self.emit(OutboundEvent::JoinNewChat(id.clone()))?;
        self.joined.insert(id.clone());
        tracing::debug!(chat_id = %id, "joined conversation room");
        Ok(())
    }

    /// Leave the room of conversation `id`.
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub fn leave_conversation(&mut self, id: &ChatId) -> Result<(), ChannelError> {
        self.joined.remove(id);
        self.emit(OutboundEvent::LeaveChat(id.clone()))?;
        tracing::debug!(chat_id = %id, "left conversation room");
        Ok(())
    }

    /// Rooms currently joined.
    pub fn joined(&self) -> impl Iterator<Item = &ChatId> {
        self.joined.iter()
    }

    /// Leave every joined room and release the channel.
    pub async fn close(&mut self) {
        let Some(handle) = self.channel.take() else {
            return;
        };
        for id in std::mem::take(&mut self.joined) {
            if let Err(e) = handle.outbox().emit(OutboundEvent::LeaveChat(id.clone())) {
                tracing::debug!(chat_id = %id, err = %e, "leave on close failed");
            }
        }
        handle.shutdown().await;
        tracing::info!("session channel closed");
    }

    /// Wait for the next channel notice.
    ///
    /// Pends forever while no channel is open or after the backend has
    /// gone away, which makes it safe to poll from a `select!` loop.
    pub async fn next_notice(&mut self) -> ChannelNotice {
        if let Some(channel) = self.channel.as_mut() {
            if let Some(notice) = channel.recv().await {
                return notice;
            }
            tracing::debug!("channel backend ended");
        }
        std::future::pending().await
    }
}
