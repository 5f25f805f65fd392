//! Push channel abstraction.
//!
//! A [`Connector`] opens one bidirectional channel per session and hands back
//! a [`ChannelHandle`]: an [`Outbox`] for named outbound events and a stream
//! of [`ChannelNotice`]s carrying inbound events plus connectivity changes.
//! Concrete implementations:
//! - [`ws::WsConnector`] for the WebSocket server channel, with reconnection
//! - [`loopback::LoopbackConnector`] for in-process tests

pub mod loopback;
pub mod ws;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use pairchat_proto::codec::CodecError;
use pairchat_proto::event::{InboundEvent, OutboundEvent};

use crate::session::Session;

/// How long [`ChannelHandle::shutdown`] waits for the backing task to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Something the channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    /// The channel (re)established its connection.
    Connected,
    /// The connection dropped; the backend may be reconnecting.
    Disconnected,
    /// A named event pushed by the server.
    Event(InboundEvent),
}

/// Errors that can occur during channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// A channel is already open for this session.
    #[error("channel already open")]
    AlreadyOpen,

    /// No channel has been opened yet.
    #[error("channel not open")]
    NotOpen,

    /// The channel has been closed and accepts no more events.
    #[error("channel closed")]
    Closed,

    /// The operation timed out before completing.
    #[error("channel operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("channel endpoint {0} is unreachable")]
    Unreachable(String),

    /// A frame could not be encoded or decoded.
    #[error("channel codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O or protocol error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cloneable sending half of a channel.
///
/// The queue is unbounded: emitting never waits, and events emitted while the
/// backend is reconnecting are flushed once the connection is back.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl Outbox {
    /// Wraps the sending side of an outbound event queue.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self { tx }
    }

    /// Queues `event` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel backend has gone away.
    pub fn emit(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        let name = event.name();
        self.tx.send(event).map_err(|_| {
            tracing::debug!(event = name, "emit on closed channel");
            ChannelError::Closed
        })
    }

    /// Whether the channel backend has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open channel as returned by [`Connector::connect`].
#[derive(Debug)]
pub struct ChannelHandle {
    outbox: Outbox,
    notices: mpsc::Receiver<ChannelNotice>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Assembles a handle from its parts.
    ///
    /// `shutdown` and `task` are optional so that backends without a
    /// background task (the loopback) can omit them.
    #[must_use]
    pub const fn new(
        outbox: Outbox,
        notices: mpsc::Receiver<ChannelNotice>,
        shutdown: Option<oneshot::Sender<()>>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbox,
            notices,
            shutdown,
            task,
        }
    }

    /// The sending half of the channel.
    #[must_use]
    pub const fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Waits for the next notice. Returns `None` once the backend is gone.
    pub async fn recv(&mut self) -> Option<ChannelNotice> {
        self.notices.recv().await
    }

    /// Signals the backend to stop and waits briefly for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                tracing::warn!("channel task did not stop in time");
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens authenticated push channels.
///
/// Implementations establish the connection, then keep it alive in the
/// background for as long as the returned [`ChannelHandle`] exists. The
/// caller is responsible for announcing the user with
/// [`OutboundEvent::UserConnected`] after the first connect; backends that
/// reconnect on their own repeat the announcement themselves.
pub trait Connector: Send + Sync {
    /// Connect on behalf of `session`.
    fn connect(
        &self,
        session: &Session,
    ) -> impl std::future::Future<Output = Result<ChannelHandle, ChannelError>> + Send;
}
