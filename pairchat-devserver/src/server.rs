//! Server core: router, request API handlers, WebSocket handler and event
//! routing.
//!
//! Every request and every channel upgrade must carry an
//! `Authorization: Bearer <token>` header naming a registered user. Channel
//! events are JSON text frames `{"event": ..., "data": ...}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use pairchat_proto::codec;
use pairchat_proto::conversation::{ChatId, CreateChatRequest, MarkReadRequest, WireConversation};
use pairchat_proto::event::{
    InboundEvent, MessageError, MessageRead, OutboundEvent, ReadUpdate, ReceiveMessage, SendMessage,
};
use pairchat_proto::user::{UserId, UserProfile};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::{ConnId, DevState, StateError};

type ServerResult = Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>>;

impl IntoResponse for StateError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::UnknownUser | Self::ChatNotFound | Self::MessageNotFound => StatusCode::NOT_FOUND,
            Self::NotParticipant => StatusCode::FORBIDDEN,
            Self::SelfChat | Self::EmptyMessage | Self::TooLarge { .. } => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// The user a request's bearer token belongs to.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

impl FromRequestParts<Arc<DevState>> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<DevState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;
        state
            .authenticate(token)
            .await
            .map(AuthUser)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

// ---------------------------------------------------------------------------
// Request API
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct SearchParams {
    #[serde(default)]
    query: String,
}

async fn list_chats(
    State(state): State<Arc<DevState>>,
    AuthUser(me): AuthUser,
) -> Json<Vec<WireConversation>> {
    Json(state.conversations_for(&me).await)
}

async fn search_users(
    State(state): State<Arc<DevState>>,
    AuthUser(me): AuthUser,
    Query(params): Query<SearchParams>,
) -> Json<Vec<UserProfile>> {
    Json(state.search_users(&me, &params.query).await)
}

async fn create_chat(
    State(state): State<Arc<DevState>>,
    AuthUser(me): AuthUser,
    Json(body): Json<CreateChatRequest>,
) -> Result<Json<WireConversation>, StateError> {
    state.create_or_get(&me, &body.user_id).await.map(Json)
}

async fn get_chat(
    State(state): State<Arc<DevState>>,
    AuthUser(me): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<WireConversation>, StateError> {
    state.conversation(&me, &ChatId::new(id)).await.map(Json)
}

async fn mark_read(
    State(state): State<Arc<DevState>>,
    AuthUser(me): AuthUser,
    Json(body): Json<MarkReadRequest>,
) -> Result<StatusCode, StateError> {
    state
        .mark_read(&body.chat_id, &body.message_id, &me)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// axum handler that authenticates and upgrades to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<DevState>>,
    headers: HeaderMap,
) -> Response {
    let user = match bearer(&headers) {
        Some(token) => state.authenticate(token).await,
        None => None,
    };
    let Some(user) = user else {
        tracing::warn!("channel upgrade without valid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

/// Handles an upgraded WebSocket connection for one authenticated user.
///
/// The connection is registered right away; `user_connected` is only
/// checked against the token's user. On disconnect the connection and its
/// room memberships are dropped.
pub async fn handle_socket(socket: WebSocket, state: Arc<DevState>, user: UserId) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.register(user.clone(), tx).await;
    tracing::info!(conn, user = %user, "client connected");

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_text_frame(conn, &reader_user, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {
                    // Binary, ping and pong frames carry no events.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn).await;
    tracing::info!(conn, user = %user, "client disconnected");
}

async fn handle_text_frame(conn: ConnId, user: &UserId, text: &str, state: &Arc<DevState>) {
    let event = match codec::decode::<OutboundEvent>(text) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "failed to decode client event");
            return;
        }
    };
    tracing::debug!(user = %user, event = event.name(), "client event");

    match event {
        OutboundEvent::UserConnected(claimed) => {
            if &claimed != user {
                tracing::warn!(user = %user, claimed = %claimed, "user_connected for another user ignored");
            }
        }
        OutboundEvent::JoinNewChat(chat) => {
            if state.is_participant(&chat, user).await {
                state.join(conn, chat).await;
            } else {
                tracing::warn!(user = %user, chat_id = %chat, "join refused: not a participant");
            }
        }
        OutboundEvent::LeaveChat(chat) => state.leave(conn, &chat).await,
        OutboundEvent::SendMessage(send) => handle_send(conn, user, send, state).await,
        OutboundEvent::MessageRead(read) => handle_read(user, read, state).await,
    }
}

async fn handle_send(conn: ConnId, user: &UserId, send: SendMessage, state: &Arc<DevState>) {
    if &send.sender_id != user {
        reply_error(state, conn, "sender does not match session").await;
        return;
    }
    let (message, participants) = match state
        .append_message(&send.chat_id, user, &send.message, send.client_id)
        .await
    {
        Ok(stored) => stored,
        Err(e) => {
            tracing::warn!(user = %user, chat_id = %send.chat_id, error = %e, "message rejected");
            reply_error(state, conn, &e.to_string()).await;
            return;
        }
    };
    if !participants.contains(&send.receiver_id) {
        tracing::debug!(chat_id = %send.chat_id, receiver = %send.receiver_id, "receiver is not a participant");
    }

    tracing::debug!(chat_id = %send.chat_id, message_id = %message.id, "routing message");
    let event = InboundEvent::ReceiveMessage(ReceiveMessage {
        chat_id: send.chat_id.clone(),
        message,
    });
    broadcast(state, &send.chat_id, &participants, &event).await;
}

async fn handle_read(user: &UserId, read: MessageRead, state: &Arc<DevState>) {
    if &read.reader_id != user {
        tracing::warn!(user = %user, reader = %read.reader_id, "read receipt for another user ignored");
        return;
    }
    match state.mark_read(&read.chat_id, &read.message_id, user).await {
        Ok((read_by, participants)) => {
            let event = InboundEvent::MessageReadUpdate(ReadUpdate {
                chat_id: read.chat_id.clone(),
                message_id: read.message_id,
                read_by,
            });
            broadcast(state, &read.chat_id, &participants, &event).await;
        }
        Err(e) => {
            tracing::warn!(user = %user, chat_id = %read.chat_id, error = %e, "read receipt rejected");
        }
    }
}

async fn broadcast(state: &Arc<DevState>, chat: &ChatId, participants: &[UserId], event: &InboundEvent) {
    match codec::encode(event) {
        Ok(frame) => {
            let reached = state.deliver(chat, participants, &Message::Text(frame.into())).await;
            tracing::debug!(chat_id = %chat, event = event.name(), reached, "event delivered");
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server event"),
    }
}

async fn reply_error(state: &Arc<DevState>, conn: ConnId, error: &str) {
    let event = InboundEvent::MessageError(MessageError {
        error: error.to_string(),
    });
    if let Ok(frame) = codec::encode(&event) {
        state.send_to(conn, Message::Text(frame.into())).await;
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// The full router: channel at `/ws`, request API under `/api/chat`.
pub fn router(state: Arc<DevState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/chat/chats", get(list_chats))
        .route("/api/chat/search", get(search_users))
        .route("/api/chat/create", post(create_chat))
        .route("/api/chat/message/read", post(mark_read))
        .route("/api/chat/{id}", get(get_chat))
        .with_state(state)
}

/// Starts the server with an empty [`DevState`] and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(addr: &str) -> ServerResult {
    start_server_with_state(addr, Arc::new(DevState::new())).await
}

/// Starts the server with a pre-seeded [`DevState`].
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(addr: &str, state: Arc<DevState>) -> ServerResult {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "dev server error");
        }
    });

    Ok((bound_addr, handle))
}
