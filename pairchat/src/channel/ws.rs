//! WebSocket push channel.
//!
//! [`WsConnector::connect`] dials the server once with the session's bearer
//! token, then hands the socket to a supervisor task that owns it for the
//! rest of the session. The supervisor:
//! - writes queued [`OutboundEvent`]s as JSON text frames
//! - decodes inbound text frames into [`ChannelNotice::Event`]s
//! - on connection loss reports [`ChannelNotice::Disconnected`], reconnects
//!   with exponential backoff, re-announces the user and reports
//!   [`ChannelNotice::Connected`]
//! - holds on to an event whose write failed and writes it first on the
//!   next socket
//!
//! Malformed frames are logged and skipped; they never drop the connection.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use pairchat_proto::codec;
use pairchat_proto::event::{InboundEvent, OutboundEvent};
use pairchat_proto::user::UserId;

use super::{ChannelError, ChannelHandle, ChannelNotice, Connector, Outbox};
use crate::session::Session;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Default timeout for a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the notice queue toward the owner.
const NOTICE_BUFFER: usize = 256;

/// Backoff schedule for reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Upper bound for the doubled delay.
    pub max_delay: Duration,
    /// Attempts per outage before giving up; `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << shift)
            .min(self.max_delay)
    }

    const fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts != 0 && attempt > self.max_attempts
    }
}

/// [`Connector`] for the server's WebSocket channel.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Overrides the per-attempt connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The channel URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self, session: &Session) -> Result<ChannelHandle, ChannelError> {
        let dialer = Dialer {
            url: self.url.clone(),
            token: session.auth_token().to_string(),
            timeout: self.connect_timeout,
        };
        let ws = dialer.dial().await?;
        tracing::info!(url = %self.url, user_id = %session.user_id(), "channel connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let supervisor = Supervisor {
            dialer,
            policy: self.policy,
            user_id: session.user_id().clone(),
            outbound: outbound_rx,
            notices: notice_tx,
            shutdown: shutdown_rx,
            held: None,
        };
        let task = tokio::spawn(supervisor.run(ws));

        Ok(ChannelHandle::new(
            Outbox::new(outbound_tx),
            notice_rx,
            Some(shutdown_tx),
            Some(task),
        ))
    }
}

/// Everything needed to (re)open the socket.
struct Dialer {
    url: String,
    token: String,
    timeout: Duration,
}

impl Dialer {
    fn request(&self) -> Result<Request, ChannelError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_connect_error)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| ChannelError::Io(std::io::Error::other(e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }

    async fn dial(&self) -> Result<WsStream, ChannelError> {
        let request = self.request()?;
        let (ws, _response) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "channel connect timed out");
                ChannelError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = %self.url, err = %e, "channel connect failed");
                map_ws_connect_error(e)
            })?;
        Ok(ws)
    }
}

/// Why a connected session ended.
enum Ended {
    /// The owner asked to stop or went away.
    Stopped,
    /// The socket failed; try again.
    Lost,
}

/// Background owner of the socket.
struct Supervisor {
    dialer: Dialer,
    policy: ReconnectPolicy,
    user_id: UserId,
    outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    notices: mpsc::Sender<ChannelNotice>,
    shutdown: oneshot::Receiver<()>,
    /// Event taken off the queue whose write failed.
    held: Option<OutboundEvent>,
}

impl Supervisor {
    async fn run(mut self, first: WsStream) {
        let mut ws = first;
        let mut reconnected = false;
        loop {
            let (mut sink, reader) = ws.split();
            if reconnected {
                let hello = OutboundEvent::UserConnected(self.user_id.clone());
                if let Err(e) = write_event(&mut sink, &hello).await {
                    tracing::warn!(err = %e, "failed to re-announce user");
                }
            }

            match self.pump(&mut sink, reader).await {
                Ended::Stopped => {
                    let _ = sink.send(Message::Close(None)).await;
                    tracing::info!("channel supervisor stopped");
                    return;
                }
                Ended::Lost => {}
            }

            if self.notices.send(ChannelNotice::Disconnected).await.is_err() {
                return;
            }
            let Some(next) = self.reconnect().await else {
                return;
            };
            ws = next;
            reconnected = true;
            if self.notices.send(ChannelNotice::Connected).await.is_err() {
                return;
            }
        }
    }

    /// Shuttles frames until the socket fails or the owner stops us.
    async fn pump(&mut self, sink: &mut WsSink, mut reader: WsReader) -> Ended {
        if let Some(event) = self.held.take() {
            if !write_or_hold(sink, event, &mut self.held).await {
                return Ended::Lost;
            }
        }
        loop {
            tokio::select! {
                _ = &mut self.shutdown => return Ended::Stopped,
                event = self.outbound.recv() => {
                    let Some(event) = event else {
                        return Ended::Stopped;
                    };
                    if !write_or_hold(sink, event, &mut self.held).await {
                        return Ended::Lost;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(text.as_str()) {
                            if self.notices.send(ChannelNotice::Event(event)).await.is_err() {
                                return Ended::Stopped;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("channel closed by server");
                        return Ended::Lost;
                    }
                    Some(Ok(_)) => {
                        // Binary, ping/pong and raw frames carry no events.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "channel read error");
                        return Ended::Lost;
                    }
                    None => {
                        tracing::info!("channel stream ended");
                        return Ended::Lost;
                    }
                },
            }
        }
    }

    /// Dials with backoff until success, exhaustion or shutdown.
    async fn reconnect(&mut self) -> Option<WsStream> {
        let mut attempt = 0_u32;
        loop {
            attempt += 1;
            if self.policy.exhausted(attempt) {
                tracing::warn!(
                    attempts = self.policy.max_attempts,
                    "giving up on channel reconnection"
                );
                return None;
            }
            let delay = self.policy.delay_for(attempt);
            tokio::select! {
                _ = &mut self.shutdown => return None,
                () = tokio::time::sleep(delay) => {}
            }
            match self.dialer.dial().await {
                Ok(ws) => {
                    tracing::info!(attempt, "channel reconnected");
                    return Some(ws);
                }
                Err(e) => {
                    tracing::debug!(attempt, err = %e, "reconnect attempt failed");
                }
            }
        }
    }
}

async fn write_event<S>(sink: &mut S, event: &OutboundEvent) -> Result<(), ChannelError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let frame = codec::encode(event)?;
    sink.send(Message::Text(frame.into()))
        .await
        .map_err(|e| ChannelError::Io(std::io::Error::other(e)))
}

/// Writes `event`, parking it in `held` when the socket refuses it.
///
/// Returns `false` when the write failed. Events that cannot be encoded are
/// dropped rather than held; retrying them cannot succeed.
async fn write_or_hold<S>(
    sink: &mut S,
    event: OutboundEvent,
    held: &mut Option<OutboundEvent>,
) -> bool
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    match write_event(sink, &event).await {
        Ok(()) => true,
        Err(ChannelError::Codec(e)) => {
            tracing::error!(event = event.name(), err = %e, "dropping unencodable event");
            true
        }
        Err(e) => {
            tracing::warn!(event = event.name(), err = %e, "channel write failed, holding event");
            *held = Some(event);
            false
        }
    }
}

/// Decodes one text frame, logging and discarding anything unknown.
fn decode_frame(text: &str) -> Option<InboundEvent> {
    match codec::decode::<InboundEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!(err = %e, "malformed channel frame, skipping");
            None
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(err: WsError) -> ChannelError {
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ChannelError::Unreachable(io_err.to_string())
            } else {
                ChannelError::Io(io_err)
            }
        }
        WsError::Http(response) => ChannelError::Io(std::io::Error::other(format!(
            "channel HTTP error: status {}",
            response.status()
        ))),
        other => ChannelError::Io(std::io::Error::other(format!(
            "channel connection error: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_proto::conversation::ChatId;
    use tokio::net::TcpListener;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            max_attempts: 0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn zero_max_attempts_never_exhausts() {
        let unlimited = ReconnectPolicy::default();
        assert!(!unlimited.exhausted(u32::MAX));

        let limited = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(!limited.exhausted(2));
        assert!(limited.exhausted(3));
    }

    #[test]
    fn unknown_frames_are_skipped() {
        assert!(decode_frame(r#"{"event":"typing","data":{}}"#).is_none());
        assert!(decode_frame("{").is_none());
        assert!(
            decode_frame(r#"{"event":"message_error","data":{"error":"x"}}"#).is_some()
        );
    }

    #[tokio::test]
    async fn failed_write_holds_event_until_next_socket() {
        let event = OutboundEvent::JoinNewChat(ChatId::new("c-1"));
        let mut held = None;

        let mut broken = Box::pin(futures_util::sink::unfold((), |(), _: Message| async {
            Err::<(), _>(WsError::ConnectionClosed)
        }));
        assert!(!write_or_hold(&mut broken, event.clone(), &mut held).await);
        assert_eq!(held, Some(event.clone()));

        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
        let mut working = Box::pin(futures_util::sink::unfold(
            frames_tx,
            |tx, frame: Message| async move {
                let _ = tx.send(frame);
                Ok::<_, WsError>(tx)
            },
        ));
        let retry = held.take().unwrap();
        assert!(write_or_hold(&mut working, retry, &mut held).await);
        assert_eq!(held, None);
        let Some(Message::Text(text)) = frames_rx.recv().await else {
            panic!("expected a text frame");
        };
        assert_eq!(text.as_str(), r#"{"event":"join_new_chat","data":"c-1"}"#);
    }

    #[tokio::test]
    async fn connect_to_nonexistent_server_returns_error() {
        let connector = WsConnector::new("ws://127.0.0.1:1/ws", ReconnectPolicy::default());
        let session = Session::new(UserId::new("u-1"), "t");
        assert!(connector.connect(&session).await.is_err());
    }

    /// Accepts one socket, checks the bearer header, forwards the first text
    /// frame it receives, then pushes an event and a garbage frame.
    #[tokio::test]
    async fn frames_flow_both_ways_with_bearer_header() {
        use tokio_tungstenite::tungstenite::handshake::server::{
            ErrorResponse, Request as SrvRequest, Response,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = oneshot::channel::<(Option<String>, String)>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth = None;
            let callback = |req: &SrvRequest, resp: Response| -> Result<Response, ErrorResponse> {
                auth = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
                .await
                .unwrap();

            let first = loop {
                if let Some(Ok(Message::Text(text))) = ws.next().await {
                    break text.as_str().to_string();
                }
            };
            let _ = seen_tx.send((auth, first));

            ws.send(Message::Text("not json".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"event":"message_error","data":{"error":"nope"}}"#.into(),
            ))
            .await
            .unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let connector = WsConnector::new(format!("ws://{addr}/ws"), ReconnectPolicy::default());
        let session = Session::new(UserId::new("u-1"), "secret");
        let mut handle = connector.connect(&session).await.unwrap();
        handle
            .outbox()
            .emit(OutboundEvent::JoinNewChat(ChatId::new("c-1")))
            .unwrap();

        let (auth, first) = tokio::time::timeout(Duration::from_secs(5), seen_rx)
            .await
            .expect("server did not see a frame")
            .unwrap();
        assert_eq!(auth.as_deref(), Some("Bearer secret"));
        assert_eq!(first, r#"{"event":"join_new_chat","data":"c-1"}"#);

        let notice = tokio::time::timeout(Duration::from_secs(5), handle.recv())
            .await
            .expect("no notice")
            .unwrap();
        assert!(matches!(
            notice,
            ChannelNotice::Event(InboundEvent::MessageError(ref e)) if e.error == "nope"
        ));

        handle.shutdown().await;
    }

    /// The server drops the first socket; the supervisor must report the
    /// outage, reconnect, and re-announce the user on the new socket.
    #[tokio::test]
    async fn reconnects_and_reannounces_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (hello_tx, hello_rx) = oneshot::channel::<String>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut first = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = first.close(None).await;
            drop(first);

            let (stream, _) = listener.accept().await.unwrap();
            let mut second = tokio_tungstenite::accept_async(stream).await.unwrap();
            loop {
                if let Some(Ok(Message::Text(text))) = second.next().await {
                    let _ = hello_tx.send(text.as_str().to_string());
                    break;
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 0,
        };
        let connector = WsConnector::new(format!("ws://{addr}/ws"), policy);
        let session = Session::new(UserId::new("u-7"), "t");
        let mut handle = connector.connect(&session).await.unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(
            tokio::time::timeout(wait, handle.recv()).await.unwrap(),
            Some(ChannelNotice::Disconnected)
        );
        assert_eq!(
            tokio::time::timeout(wait, handle.recv()).await.unwrap(),
            Some(ChannelNotice::Connected)
        );
        let hello = tokio::time::timeout(wait, hello_rx).await.unwrap().unwrap();
        assert_eq!(hello, r#"{"event":"user_connected","data":"u-7"}"#);

        handle.shutdown().await;
    }
}
