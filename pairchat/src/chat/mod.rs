//! Chat surface for `PairChat`.
//!
//! Contains the [`ChatSurface`], the single owner of every piece of chat
//! state: the session channel, the conversation list, search results, the
//! active [`MessageTimeline`] and its [`ReadReceiptTracker`]. All mutation
//! happens on the task that drives the surface; timers and the channel
//! backend only ever report back to it.
//!
//! The surface's behavior is split by concern:
//! - `send.rs`: optimistic send pipeline
//! - `receive.rs`: inbound channel events, acknowledgement reports, resync
//! - `open.rs`: search, selection and opening a conversation

pub mod list;
pub mod model;
pub mod receipts;
pub mod timeline;

mod open;
mod receive;
mod send;

use std::sync::Arc;

use tokio::sync::mpsc;

use pairchat_proto::conversation::ChatId;
use pairchat_proto::user::{UserId, UserProfile};

use crate::channel::{ChannelError, ChannelNotice, Connector};
use crate::connection::ConnectionManager;
use crate::service::{ChatService, ServiceError};
use crate::session::Session;

use list::ChatListStore;
use receipts::{Pacing, ReadReceiptTracker, ReceiptReport};
use timeline::MessageTimeline;

/// Surface-level error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The action does not apply right now (blank text, nothing selected).
    /// Never shown to the user.
    #[error("ignored: {0}")]
    Validation(&'static str),

    /// A send was rejected, locally or by the server.
    #[error("message could not be sent: {0}")]
    Transport(String),

    /// A request to the chat service failed.
    #[error("request failed: {0}")]
    Request(#[source] ServiceError),

    /// The channel could not be used.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The session's credentials were rejected.
    #[error("session expired")]
    AuthExpired,

    /// No conversation at that list position.
    #[error("no conversation at position {0}")]
    NotListed(usize),

    /// The surface has been torn down.
    #[error("no active session")]
    NoSession,
}

impl From<ServiceError> for ChatError {
    fn from(err: ServiceError) -> Self {
        if err.is_auth_expiry() {
            Self::AuthExpired
        } else {
            Self::Request(err)
        }
    }
}

/// Notifications for whatever renders the surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The conversation list was replaced.
    ChatListUpdated,
    /// Search results changed (possibly to empty).
    SearchUpdated,
    /// A conversation became the active one.
    ConversationOpened {
        /// The conversation.
        chat_id: ChatId,
    },
    /// The active timeline changed.
    TimelineChanged {
        /// The conversation shown.
        chat_id: ChatId,
    },
    /// The channel connection went down or came back.
    ConnectionChanged {
        /// Whether the channel is connected now.
        connected: bool,
    },
    /// A user-visible failure.
    Error(String),
    /// The session's credentials were rejected; the surface is gone.
    SessionExpired,
    /// The surface was torn down on request.
    SessionEnded,
}

/// Input the driver of [`ChatSurface::run`] can send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the input buffer.
    SetInput(String),
    /// Send the input buffer.
    SubmitInput,
    /// Send the given text.
    Send(String),
    /// Search users.
    Search(String),
    /// Open (creating if needed) the conversation with a user.
    SelectUser(UserId),
    /// Open an existing conversation.
    SelectConversation(ChatId),
    /// Open the conversation at a position of the list.
    SelectListed(usize),
    /// Re-fetch the conversation list.
    RefreshList,
    /// Tear down and stop.
    Quit,
}

/// Tunables of a [`ChatSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Acknowledgement timers.
    pub pacing: Pacing,
    /// Capacity of the [`SurfaceEvent`] queue.
    pub event_buffer: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            event_buffer: 64,
        }
    }
}

/// The conversation currently shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConversation {
    /// Conversation id.
    pub id: ChatId,
    /// The participant that is not the session user, once known.
    pub other: Option<UserProfile>,
}

/// Something the surface was woken up for.
enum Wake {
    Notice(ChannelNotice),
    Receipt(ReceiptReport),
}

/// Owns and drives all chat state of one session.
pub struct ChatSurface<C, S> {
    session: Option<Session>,
    connection: ConnectionManager<C>,
    service: Arc<S>,
    list: ChatListStore,
    search_results: Vec<UserProfile>,
    active: Option<ActiveConversation>,
    timeline: MessageTimeline,
    tracker: ReadReceiptTracker<S>,
    acks: mpsc::UnboundedReceiver<ReceiptReport>,
    input: String,
    disconnected: bool,
    event_tx: mpsc::Sender<SurfaceEvent>,
}

impl<C: Connector, S: ChatService + 'static> ChatSurface<C, S> {
    /// Creates a surface for `session`.
    ///
    /// Nothing touches the network until [`start`](Self::start). Returns the
    /// surface and the receiver of its [`SurfaceEvent`]s.
    pub fn new(
        session: Session,
        connector: C,
        service: Arc<S>,
        config: SurfaceConfig,
    ) -> (Self, mpsc::Receiver<SurfaceEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (tracker, acks) =
            ReadReceiptTracker::new(Arc::clone(&service), session.user_id().clone(), config.pacing);
        let surface = Self {
            session: Some(session),
            connection: ConnectionManager::new(connector),
            service,
            list: ChatListStore::new(),
            search_results: Vec::new(),
            active: None,
            timeline: MessageTimeline::default(),
            tracker,
            acks,
            input: String::new(),
            disconnected: false,
            event_tx,
        };
        (surface, event_rx)
    }

    /// Opens the session channel and loads the conversation list.
    ///
    /// # Errors
    ///
    /// [`ChatError::Channel`] if the channel cannot be opened, or the
    /// request error of the initial list fetch.
    pub async fn start(&mut self) -> Result<(), ChatError> {
        let session = self.session.clone().ok_or(ChatError::NoSession)?;
        self.connection.open(&session).await?;
        self.refresh_list().await
    }

    /// Replaces the conversation list with the server's.
    ///
    /// # Errors
    ///
    /// Returns the request error; the list is left unchanged.
    pub async fn refresh_list(&mut self) -> Result<(), ChatError> {
        let me = self.me()?.clone();
        let conversations = self.service.list_conversations().await?;
        self.list.replace(conversations, &me);
        self.emit(SurfaceEvent::ChatListUpdated);
        Ok(())
    }

    /// The session, until the surface is torn down.
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The conversation list.
    #[must_use]
    pub const fn chat_list(&self) -> &ChatListStore {
        &self.list
    }

    /// Users found by the last search.
    #[must_use]
    pub fn search_results(&self) -> &[UserProfile] {
        &self.search_results
    }

    /// The conversation shown, if any.
    #[must_use]
    pub const fn active_conversation(&self) -> Option<&ActiveConversation> {
        self.active.as_ref()
    }

    /// Messages of the active conversation.
    #[must_use]
    pub const fn timeline(&self) -> &MessageTimeline {
        &self.timeline
    }

    /// Acknowledgement timers of the active conversation.
    #[must_use]
    pub const fn receipts(&self) -> &ReadReceiptTracker<S> {
        &self.tracker
    }

    /// The unsent input buffer.
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Replaces the unsent input buffer.
    pub fn set_input(&mut self, text: impl Into<String>) {
        self.input = text.into();
    }

    /// Whether the channel is believed to be connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_open() && !self.disconnected
    }

    /// Tears the surface down because the session was invalidated.
    pub async fn invalidate_session(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.teardown().await;
        self.emit(SurfaceEvent::SessionEnded);
    }

    /// Waits for the next channel notice or acknowledgement report and
    /// handles it. Errors are reported as [`SurfaceEvent`]s.
    pub async fn process_next(&mut self) {
        let wake = self.next_wake().await;
        self.dispatch(wake).await;
    }

    /// Drives the surface until [`Command::Quit`], the command sender is
    /// dropped, or the session ends; then tears it down.
    pub async fn run(mut self, commands: mpsc::Receiver<Command>) {
        self.drive(commands, |_| {}).await;
    }

    /// Like [`run`](Self::run), but hands every [`SurfaceEvent`] to
    /// `render` together with the surface state it refers to.
    pub async fn run_with<R>(
        mut self,
        commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<SurfaceEvent>,
        mut render: R,
    ) where
        R: FnMut(&Self, SurfaceEvent),
    {
        self.drive(commands, |surface| {
            while let Ok(event) = events.try_recv() {
                render(surface, event);
            }
        })
        .await;
    }

    async fn drive(&mut self, mut commands: mpsc::Receiver<Command>, mut after: impl FnMut(&Self)) {
        after(self);
        while self.session.is_some() {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        None | Some(Command::Quit) => break,
                        Some(command) => {
                            if let Err(e) = self.handle_command(command).await {
                                self.report(e).await;
                            }
                        }
                    }
                }
                wake = self.next_wake() => self.dispatch(wake).await,
            }
            after(self);
        }
        if self.session.is_some() {
            self.teardown().await;
            self.emit(SurfaceEvent::SessionEnded);
        }
        after(self);
        tracing::info!("chat surface stopped");
    }

    async fn handle_command(&mut self, command: Command) -> Result<(), ChatError> {
        match command {
            Command::SetInput(text) => {
                self.set_input(text);
                Ok(())
            }
            Command::SubmitInput => self.submit_input().map(|_| ()),
            Command::Send(text) => self.send(&text).map(|_| ()),
            Command::Search(query) => self.search(&query).await,
            Command::SelectUser(user) => self.select_user(&user).await,
            Command::SelectConversation(id) => self.select_conversation(&id).await,
            Command::SelectListed(index) => {
                let id = self
                    .list
                    .nth(index)
                    .map(|c| c.id.clone())
                    .ok_or(ChatError::NotListed(index))?;
                self.select_conversation(&id).await
            }
            Command::RefreshList => self.refresh_list().await,
            Command::Quit => Ok(()),
        }
    }

    /// Only waits; safe to cancel from `select!`.
    async fn next_wake(&mut self) -> Wake {
        tokio::select! {
            notice = self.connection.next_notice() => Wake::Notice(notice),
            Some(report) = self.acks.recv() => Wake::Receipt(report),
        }
    }

    async fn dispatch(&mut self, wake: Wake) {
        match wake {
            Wake::Notice(notice) => {
                if let Err(e) = self.handle_notice(notice).await {
                    self.report(e).await;
                }
            }
            Wake::Receipt(ReceiptReport::Dispatched(ack)) => self.handle_ack(&ack),
            Wake::Receipt(ReceiptReport::AuthExpired) => {
                if self.session.is_some() {
                    self.report(ChatError::AuthExpired).await;
                }
            }
        }
    }

    /// Routes an error to its single user-visible path.
    async fn report(&mut self, err: ChatError) {
        match err {
            ChatError::Validation(reason) => {
                tracing::debug!(reason, "ignored action");
            }
            ChatError::AuthExpired => {
                tracing::warn!("session credentials rejected, tearing down");
                self.teardown().await;
                self.emit(SurfaceEvent::SessionExpired);
            }
            other => {
                tracing::warn!(err = %other, "chat surface error");
                self.emit(SurfaceEvent::Error(other.to_string()));
            }
        }
    }

    /// Cancels timers, leaves every room, closes the channel and forgets
    /// all session state.
    async fn teardown(&mut self) {
        self.tracker.end();
        self.connection.close().await;
        self.active = None;
        self.timeline.clear();
        self.search_results.clear();
        self.input.clear();
        self.session = None;
        tracing::info!("chat surface torn down");
    }

    fn me(&self) -> Result<&UserId, ChatError> {
        self.session
            .as_ref()
            .map(Session::user_id)
            .ok_or(ChatError::NoSession)
    }

    fn is_active(&self, chat: &ChatId) -> bool {
        self.active.as_ref().is_some_and(|a| &a.id == chat)
    }

    fn emit(&self, event: SurfaceEvent) {
        let _ = self.event_tx.try_send(event);
    }
}
