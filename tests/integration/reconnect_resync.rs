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

//! Integration tests for channel reconnection.
//!
//! The dev server closes every socket to simulate a drop. These tests
//! validate:
//! - the surface reports the drop and the recovery
//! - after reconnecting, the active conversation is re-fetched so messages
//!   missed while away appear, without duplicating known ones
//! - the room is re-joined and live delivery works again

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pairchat::channel::ws::{ReconnectPolicy, WsConnector};
use pairchat::chat::receipts::Pacing;
use pairchat::chat::{ChatSurface, SurfaceConfig, SurfaceEvent};
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

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
        max_attempts: 0,
    }
}

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
    let connector = WsConnector::new(format!("ws://{addr}/ws"), fast_reconnect());
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

async fn pump_until(surface: &mut Surface, mut done: impl FnMut(&Surface) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(surface) {
            surface.process_next().await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn drain(events: &mut mpsc::Receiver<SurfaceEvent>) -> Vec<SurfaceEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn missed_messages_appear_after_reconnect() {
    let (addr, state) = start_server().await;
    let (mut alice, mut events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    alice.send("before the drop").unwrap();
    pump_until(&mut alice, |s| s.timeline().optimistic_count() == 0).await;
    let chat = alice.active_conversation().unwrap().id.clone();
    drain(&mut events);

    state.close_all_connections().await;
    pump_until(&mut alice, |s| !s.is_connected()).await;

    // Written while alice is away; nothing pushes it to her.
    state
        .append_message(&chat, &UserId::new(BOB), "while you were out", None)
        .await
        .unwrap();

    pump_until(&mut alice, |s| s.is_connected() && s.timeline().len() == 2).await;

    let contents: Vec<&str> = alice
        .timeline()
        .messages()
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(contents, vec!["before the drop", "while you were out"]);

    let seen = drain(&mut events);
    let connection: Vec<&SurfaceEvent> = seen
        .iter()
        .filter(|e| matches!(e, SurfaceEvent::ConnectionChanged { .. }))
        .collect();
    assert_eq!(
        connection,
        vec![
            &SurfaceEvent::ConnectionChanged { connected: false },
            &SurfaceEvent::ConnectionChanged { connected: true },
        ]
    );
}

#[tokio::test]
async fn live_delivery_resumes_after_reconnect() {
    let (addr, state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();

    state.close_all_connections().await;
    pump_until(&mut alice, |s| !s.is_connected()).await;
    pump_until(&mut alice, Surface::is_connected).await;

    // Bob connects only now, so his message can only arrive over alice's
    // new socket.
    let (mut bob, _bob_events) = client(addr, BOB, "tok-bob").await;
    bob.select_user(&UserId::new(ALICE)).await.unwrap();
    bob.send("welcome back").unwrap();

    pump_until(&mut alice, |s| s.timeline().len() == 1).await;
    assert_eq!(alice.timeline().messages()[0].content, "welcome back");
}

#[tokio::test]
async fn outage_does_not_duplicate_known_messages() {
    let (addr, state) = start_server().await;
    let (mut alice, _alice_events) = client(addr, ALICE, "tok-alice").await;

    alice.select_user(&UserId::new(BOB)).await.unwrap();
    for text in ["a", "b", "c"] {
        alice.send(text).unwrap();
    }
    pump_until(&mut alice, |s| s.timeline().optimistic_count() == 0).await;

    for _ in 0..2 {
        state.close_all_connections().await;
        pump_until(&mut alice, |s| !s.is_connected()).await;
        pump_until(&mut alice, Surface::is_connected).await;
    }

    let ids: Vec<&str> = alice
        .timeline()
        .messages()
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(ids.len(), 3);
    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), 3);
}
