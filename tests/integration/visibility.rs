// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for host visibility: a hidden client stops handling
//! events and catches up from history when shown again.

use std::net::SocketAddr;
use std::time::Duration;

use civicchat::chat::history::HttpHistory;
use civicchat::chat::{ChatClient, ChatEvent, ClientSettings};
use civicchat::config::{ChatConfig, ConnectionConfig, TypingConfig};
use civicchat::transport::Credentials;
use civicchat::transport::connection::Connection;
use civicchat::transport::ws::WsConnector;
use civicchat_proto::message::{ConversationKey, MessageKind, UserId};
use civicchat_relay::relay;
use tokio::sync::mpsc;

type Client = ChatClient<WsConnector, HttpHistory>;

async fn start_relay() -> SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0")
        .await
        .expect("failed to start relay");
    addr
}

fn key() -> ConversationKey {
    ConversationKey::new("citizen".into(), "admin".into())
}

async fn open(addr: SocketAddr, user: &str) -> (Client, mpsc::Receiver<ChatEvent>) {
    open_with(addr, user, key()).await
}

async fn open_with(
    addr: SocketAddr,
    user: &str,
    conversation: ConversationKey,
) -> (Client, mpsc::Receiver<ChatEvent>) {
    let connector = WsConnector::new(&format!("ws://{addr}/ws")).unwrap();
    let history = HttpHistory::new(&format!("http://{addr}/"), "token").unwrap();
    let connection = Connection::new(
        connector,
        Credentials {
            user_id: UserId::new(user),
            token: "token".into(),
        },
        ConnectionConfig::default(),
    );
    let settings = ClientSettings {
        chat: ChatConfig {
            event_buffer: 256,
            ..ChatConfig::default()
        },
        typing: TypingConfig {
            idle: Duration::from_secs(5),
            remote_expiry: Duration::from_secs(5),
        },
        ..ClientSettings::default()
    };
    let (client, events) = ChatClient::new(connection, history, settings);
    client.start().await.expect("connect");
    client
        .open_conversation(conversation)
        .await
        .expect("open");
    (client, events)
}

async fn wait_for(
    events: &mut mpsc::Receiver<ChatEvent>,
    mut pred: impl FnMut(&ChatEvent) -> bool,
) -> ChatEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for chat event")
}

#[tokio::test]
async fn hidden_client_catches_up_on_show() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    admin.hide();
    assert!(!admin.is_visible());
    assert!(admin.is_connected());

    citizen
        .send("Sent while the admin tab was hidden", MessageKind::Text)
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(admin.messages().is_empty());
    while let Ok(event) = admin_events.try_recv() {
        assert!(!matches!(event, ChatEvent::MessageAdded(_)), "got {event:?}");
    }

    admin.show().await.expect("refresh");
    assert!(admin.is_visible());
    let messages = admin.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.content, "Sent while the admin tab was hidden");

    // live delivery resumes
    citizen
        .send("And one after", MessageKind::Text)
        .await
        .expect("send");
    wait_for(&mut admin_events, |e| {
        matches!(e, ChatEvent::MessageAdded(m) if m.content == "And one after")
    })
    .await;
    assert_eq!(admin.messages().len(), 2);
}

#[tokio::test]
async fn hidden_client_does_not_mark_seen() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    citizen
        .send("Please review my permit", MessageKind::Text)
        .await
        .expect("send");
    let ChatEvent::MessageAdded(message) =
        wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessageAdded(_))).await
    else {
        unreachable!()
    };

    admin.hide();
    assert!(!admin.observe(&message.id, 1.0));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(admin.seen_requests(), 0);
}

#[tokio::test]
async fn hiding_clears_typing_both_ways() {
    let addr = start_relay().await;
    let (citizen, mut citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    citizen.keystroke();
    admin.keystroke();
    wait_for(&mut admin_events, |e| {
        matches!(e, ChatEvent::TypingChanged(t) if t.is_typing)
    })
    .await;
    wait_for(&mut citizen_events, |e| {
        matches!(e, ChatEvent::TypingChanged(t) if t.is_typing)
    })
    .await;

    admin.hide();
    assert!(!admin.is_typing());
    assert!(!admin.typing().is_typing);
    wait_for(&mut citizen_events, |e| {
        matches!(e, ChatEvent::TypingChanged(t) if !t.is_typing)
    })
    .await;
    assert!(!citizen.typing().is_typing);
}

#[tokio::test]
async fn repeated_show_does_not_duplicate_delivery() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    admin.show().await.expect("already visible");
    admin.hide();
    admin.show().await.expect("refresh");
    admin.show().await.expect("no-op");

    citizen
        .send("Exactly once", MessageKind::Text)
        .await
        .expect("send");
    wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessageAdded(_))).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = admin_events.try_recv() {
        assert!(!matches!(event, ChatEvent::MessageAdded(_)), "duplicate {event:?}");
    }
    assert_eq!(admin.messages().len(), 1);
}

#[tokio::test]
async fn unread_counts_pause_while_hidden() {
    let addr = start_relay().await;
    let (admin, mut admin_events) = open(addr, "admin").await;
    let other = ConversationKey::new("resident".into(), "admin".into());
    let (resident, _resident_events) = open_with(addr, "resident", other.clone()).await;

    admin.hide();
    resident
        .send("Bin collection missed", MessageKind::Text)
        .await
        .expect("send");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(admin.unread(&other), 0);

    admin.show().await.expect("refresh");
    resident
        .send("Still waiting", MessageKind::Text)
        .await
        .expect("send");
    wait_for(&mut admin_events, |e| {
        matches!(e, ChatEvent::ConversationUpdated { key, unread_count: 1 } if *key == other)
    })
    .await;
    assert_eq!(admin.unread(&other), 1);
    assert_eq!(admin.active_conversation(), Some(key()));
}
