// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for presence and typing indicators through the relay.

use std::net::SocketAddr;
use std::time::Duration;

use civicchat::chat::history::HttpHistory;
use civicchat::chat::typing::TypingState;
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
            idle: Duration::from_millis(150),
            remote_expiry: Duration::from_secs(5),
        },
        ..ClientSettings::default()
    };
    let (client, events) = ChatClient::new(connection, history, settings);
    client.start().await.expect("connect");
    client.open_conversation(key()).await.expect("open");
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

fn typing_by(user: &str) -> TypingState {
    TypingState {
        is_typing: true,
        typing_user_id: Some(user.into()),
    }
}

#[tokio::test]
async fn presence_follows_sessions() {
    let addr = start_relay().await;
    let (citizen, mut citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    // the admin is told on connect, the citizen by broadcast
    wait_for(&mut citizen_events, |e| {
        *e == ChatEvent::PresenceChanged {
            user_id: "admin".into(),
            is_online: true,
        }
    })
    .await;
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::PresenceChanged {
            user_id: "citizen".into(),
            is_online: true,
        }
    })
    .await;
    assert_eq!(citizen.presence(&"admin".into()), Some(true));
    assert_eq!(admin.presence(&"citizen".into()), Some(true));

    admin.stop();
    wait_for(&mut citizen_events, |e| {
        *e == ChatEvent::PresenceChanged {
            user_id: "admin".into(),
            is_online: false,
        }
    })
    .await;
    assert_eq!(citizen.presence(&"admin".into()), Some(false));
    assert!(!admin.is_connected());
}

#[tokio::test]
async fn typing_starts_and_stops_after_idle() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    citizen.keystroke();
    assert!(citizen.is_typing());
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::TypingChanged(typing_by("citizen"))
    })
    .await;
    assert_eq!(admin.typing(), typing_by("citizen"));

    // idle period elapses without keystrokes
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::TypingChanged(TypingState::default())
    })
    .await;
    assert!(!citizen.is_typing());
    assert!(!admin.typing().is_typing);
}

#[tokio::test]
async fn sending_ends_the_typing_period() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    citizen.keystroke();
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::TypingChanged(typing_by("citizen"))
    })
    .await;

    citizen
        .send("Broken bench in the park", MessageKind::Text)
        .await
        .expect("send");
    assert!(!citizen.is_typing());

    wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessageAdded(_))).await;
    assert!(!admin.typing().is_typing);
}

#[tokio::test]
async fn blur_stops_typing_immediately() {
    let addr = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    citizen.keystroke();
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::TypingChanged(typing_by("citizen"))
    })
    .await;
    citizen.blur();
    assert!(!citizen.is_typing());
    wait_for(&mut admin_events, |e| {
        *e == ChatEvent::TypingChanged(TypingState::default())
    })
    .await;
}
