// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::redundant_pub_crate,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for read receipts.
//!
//! These tests validate, against a real dev server:
//! - opening a conversation acknowledges its unread backlog, and the sender
//!   sees every message turn `Read`
//! - the durable `mark_message_read` request lands on the server after the
//!   push acknowledgement
//! - a live message in an open conversation is acknowledged
//! - own messages are never acknowledged by their sender

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pairchat::channel::ws::{ReconnectPolicy, WsConnector};
use pairchat::chat::model::ReceiptState;
use pairchat::chat::receipts::Pacing;
use pairchat::chat::{ChatSurface, SurfaceConfig, SurfaceEvent};
use pairchat::service::http::HttpChatService;
use pairchat::session::Session;
use pairchat_devserver::server;
use pairchat_devserver::state::DevState;
use pairchat_proto::conversation::ChatId;
use pairchat_proto::user::{UserId, UserProfile};
use tokio::sync::mpsc;
use url::Url;

type Surface = ChatSurface<WsConnector, HttpChatService>;

const ALICE: &str = "u-alice";
const BOB: &str = "u-bob";

async fn start_server() -> (SocketAddr, Arc<DevState>) {
    let state = Arc::new(DevState::new());
    state.add_user(UserProfile::new(ALICE, "alice"), "tok-alice").await;
    state.add_user(UserProfile::new(BOB, "bob"), "tok-bob").await;
    let (addr, _handle) = server::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    (addr, state)
}

async fn client(addr: SocketAddr, user: &str, token: &str) -> (Surface, mpsc::Receiver<SurfaceEvent>) {
    let session = Session::new(UserId::new(user), token);
    let service = HttpChatService::new(
        Url::parse(&format!("http://{addr}/")).unwrap(),
        &session,
        Duration::from_secs(5),
    )
    .unwrap();
    let connector = WsConnector::new(format!("ws://{addr}/ws"), ReconnectPolicy::default());
    let config = SurfaceConfig {
        pacing: Pacing {
            ack_pacing: Duration::from_millis(30),
            read_confirm_delay: Duration::from_millis(60),
        },
        event_buffer: 256,
    };
    let (mut surface, events) = ChatSurface::new(session, connector, Arc::new(service), config);
    surface.start().await.unwrap();
    (surface, events)
}

async fn pump_until(surface: &mut Surface, mut done: impl FnMut(&Surface) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(surface) {
            surface.process_next().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Polls the server until every message of `chat` satisfies `done`.
async fn server_until(state: &DevState, chat: &ChatId, done: impl Fn(&[UserId]) -> bool) {
    let reader = UserId::new(ALICE);
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let conversation = state.conversation(&reader, chat).await.unwrap();
            if conversation.messages.iter().all(|m| {
                let readers: Vec<UserId> = m.read_by.iter().map(|r| r.id().clone()).collect();
                done(&readers)
            }) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server state not reached in time");
}

fn all_read(surface: &Surface) -> bool {
    let me = UserId::new(BOB);
    let messages = surface.timeline().messages();
    !messages.is_empty()
        && messages
            .iter()
            .all(|m| m.receipt_state(&me) == Some(ReceiptState::Read))
}

#[tokio::test]
async fn opening_a_backlog_marks_every_message_read() {
    let (addr, state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;
    let (mut bob, _bob_events) = client(addr, BOB, "tok-bob").await;

    bob.select_user(&UserId::new(ALICE)).await.unwrap();
    for text in ["one", "two", "three"] {
        bob.send(text).unwrap();
    }
    pump_until(&mut bob, |s| {
        s.timeline().len() == 3 && s.timeline().optimistic_count() == 0
    })
    .await;
    assert!(bob.timeline().messages().iter().all(|m| {
        m.receipt_state(&UserId::new(BOB)) == Some(ReceiptState::Sent)
    }));

    let chat = bob.active_conversation().unwrap().id.clone();
    alice.select_conversation(&chat).await.unwrap();
    assert_eq!(alice.timeline().len(), 3);
    assert!(alice
        .timeline()
        .messages()
        .iter()
        .all(|m| alice.receipts().is_scheduled(&m.id)));

    // The sender sees the receipts through message_read_update pushes.
    pump_until(&mut bob, all_read).await;

    // The reader records its own acknowledgements locally.
    let me = UserId::new(ALICE);
    pump_until(&mut alice, |s| {
        s.timeline().messages().iter().all(|m| m.is_read_by(&me))
    })
    .await;

    // And the durable request reached the server.
    server_until(&state, &chat, |readers| readers.contains(&UserId::new(ALICE))).await;
}

#[tokio::test]
async fn live_message_in_open_conversation_is_acknowledged() {
    let (addr, _state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;
    let (mut bob, _bob_events) = client(addr, BOB, "tok-bob").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    bob.select_user(&UserId::new(ALICE)).await.unwrap();

    bob.send("are you reading this?").unwrap();

    pump_until(&mut alice, |s| s.timeline().len() == 1).await;
    pump_until(&mut bob, all_read).await;
    assert_eq!(
        bob.timeline().messages()[0].receipt_state(&UserId::new(BOB)).map(ReceiptState::ticks),
        Some("✓✓")
    );
}

#[tokio::test]
async fn own_messages_are_not_acknowledged() {
    let (addr, state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    alice.send("talking to myself").unwrap();
    pump_until(&mut alice, |s| s.timeline().optimistic_count() == 0).await;
    assert_eq!(alice.receipts().pending(), 0);

    // Give any stray acknowledgement time to land before checking.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let chat = alice.active_conversation().unwrap().id.clone();
    server_until(&state, &chat, <[UserId]>::is_empty).await;
}
