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

//! Integration tests for the optimistic send round trip.
//!
//! Two real clients (WebSocket channel + HTTP request API) talk through an
//! in-process `pairchat-devserver`. These tests validate:
//! - a sent message shows up immediately and resolves into exactly one
//!   confirmed entry carrying the server id
//! - identical messages sent back to back stay distinct
//! - the receiver's conversation list is refreshed by the push
//! - a rejected token tears the surface down with `SessionExpired`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pairchat::channel::ws::{ReconnectPolicy, WsConnector};
use pairchat::chat::list::PreviewAuthor;
use pairchat::chat::receipts::Pacing;
use pairchat::chat::{ChatSurface, Command, SurfaceConfig, SurfaceEvent};
use pairchat::service::http::HttpChatService;
use pairchat::session::Session;
use pairchat_devserver::server;
use pairchat_devserver::state::DevState;
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
            ack_pacing: Duration::from_millis(20),
            read_confirm_delay: Duration::from_millis(50),
        },
        event_buffer: 256,
    };
    let (mut surface, events) = ChatSurface::new(session, connector, Arc::new(service), config);
    surface.start().await.unwrap();
    (surface, events)
}

/// Processes channel notices until `done` holds.
async fn pump_until(surface: &mut Surface, mut done: impl FnMut(&Surface) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(surface) {
            surface.process_next().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn optimistic_send_resolves_into_one_confirmed_entry() {
    let (addr, _state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    let placeholder = alice.send("hello bob").unwrap().unwrap();

    let timeline = alice.timeline();
    assert_eq!(timeline.len(), 1);
    assert!(timeline.messages()[0].is_optimistic);

    pump_until(&mut alice, |s| s.timeline().optimistic_count() == 0).await;

    let messages = alice.timeline().messages();
    assert_eq!(messages.len(), 1);
    assert_ne!(messages[0].id, placeholder);
    assert!(messages[0].id.as_str().starts_with("m-"));
    assert_eq!(messages[0].content, "hello bob");
}

#[tokio::test]
async fn identical_messages_stay_distinct() {
    let (addr, _state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    alice.send("ok").unwrap();
    alice.send("ok").unwrap();
    assert_eq!(alice.timeline().optimistic_count(), 2);

    pump_until(&mut alice, |s| s.timeline().optimistic_count() == 0).await;

    let ids: Vec<&str> = alice
        .timeline()
        .messages()
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);
}

#[tokio::test]
async fn push_refreshes_receiver_conversation_list() {
    let (addr, _state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;
    let (mut bob, _bob_events) = client(addr, BOB, "tok-bob").await;
    assert!(bob.chat_list().is_empty());

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    alice.send("are you there?").unwrap();

    pump_until(&mut bob, |s| {
        s.chat_list()
            .summaries()
            .first()
            .is_some_and(|c| c.last_message.is_some())
    })
    .await;

    let summary = &bob.chat_list().summaries()[0];
    assert_eq!(summary.title(), "alice");
    let preview = summary.last_message.as_ref().unwrap();
    assert_eq!(preview.author, PreviewAuthor::Them("alice".into()));
    assert_eq!(preview.content, "are you there?");
    // Bob has not opened anything; the push only touched the list.
    assert!(bob.timeline().is_empty());
}

#[tokio::test]
async fn receiver_with_conversation_open_sees_the_message() {
    let (addr, _state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;
    let (mut bob, _bob_events) = client(addr, BOB, "tok-bob").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    bob.select_user(&UserId::new(ALICE)).await.unwrap();
    alice.send("ping").unwrap();

    pump_until(&mut bob, |s| s.timeline().len() == 1).await;

    let entry = &bob.timeline().messages()[0];
    assert_eq!(entry.sender_id, UserId::new(ALICE));
    assert!(!entry.is_optimistic);
}

#[tokio::test]
async fn revoked_token_expires_session() {
    let (addr, state) = start_server().await;
    let (alice, mut events) = client(addr, ALICE, "tok-alice").await;
    let (tx, rx) = mpsc::channel(8);
    let driver = tokio::spawn(alice.run(rx));

    state.revoke_token("tok-alice").await;
    tx.send(Command::RefreshList).await.unwrap();

    let expired = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if event == SurfaceEvent::SessionExpired {
                return true;
            }
        }
        false
    })
    .await
    .unwrap();
    assert!(expired);

    tokio::time::timeout(Duration::from_secs(5), driver)
        .await
        .unwrap()
        .unwrap();
}
