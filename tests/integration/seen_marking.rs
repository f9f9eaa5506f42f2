// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for seen-marking: a viewer reports visible messages,
//! the relay records them and both sides learn the receipt.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use civicchat::chat::history::HttpHistory;
use civicchat::chat::{ChatClient, ChatEvent, ClientSettings};
use civicchat::config::{ChatConfig, ConnectionConfig, SeenConfig};
use civicchat::transport::Credentials;
use civicchat::transport::connection::Connection;
use civicchat::transport::ws::WsConnector;
use civicchat_proto::message::{ConversationKey, Message, MessageKind, UserId};
use civicchat_relay::relay::{self, RelayState};
use tokio::sync::mpsc;

type Client = ChatClient<WsConnector, HttpHistory>;

async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    (addr, state)
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
        seen: SeenConfig {
            debounce: Duration::from_millis(50),
            ..SeenConfig::default()
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

async fn deliver(citizen: &Client, admin_events: &mut mpsc::Receiver<ChatEvent>, text: &str) -> Message {
    citizen.send(text, MessageKind::Text).await.expect("send");
    let ChatEvent::MessageAdded(message) = wait_for(admin_events, |e| {
        matches!(e, ChatEvent::MessageAdded(m) if m.content == text)
    })
    .await
    else {
        unreachable!()
    };
    message
}

#[tokio::test]
async fn visible_message_is_marked_seen_for_both_sides() {
    let (addr, _state) = start_relay().await;
    let (citizen, mut citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    let message = deliver(&citizen, &mut admin_events, "Streetlight out").await;
    assert!(admin.observe(&message.id, 1.0));

    let ChatEvent::MessagesSeen(confirmed) =
        wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessagesSeen(_))).await
    else {
        unreachable!()
    };
    assert_eq!(confirmed, vec![message.id.clone()]);
    assert!(admin.is_seen_confirmed(&message.id));
    assert_eq!(admin.seen_requests(), 1);

    let ChatEvent::MessagesSeen(seen) =
        wait_for(&mut citizen_events, |e| matches!(e, ChatEvent::MessagesSeen(_))).await
    else {
        unreachable!()
    };
    assert_eq!(seen, vec![message.id.clone()]);
    let own = citizen.messages();
    assert!(own[0].message.is_seen());
}

#[tokio::test]
async fn burst_of_visible_messages_is_sent_as_one_batch() {
    let (addr, state) = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    let mut ids = Vec::new();
    for text in ["a", "b", "c"] {
        ids.push(deliver(&citizen, &mut admin_events, text).await.id);
    }
    for id in &ids {
        assert!(admin.observe(id, 0.9));
    }

    let ChatEvent::MessagesSeen(confirmed) =
        wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessagesSeen(_))).await
    else {
        unreachable!()
    };
    assert_eq!(confirmed.len(), 3);
    assert_eq!(admin.seen_requests(), 1);

    let list = state.store.conversations(&"admin".into()).await;
    assert_eq!(list[0].unread_count, 0);
}

#[tokio::test]
async fn own_and_barely_visible_messages_are_not_marked() {
    let (addr, _state) = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    let message = deliver(&citizen, &mut admin_events, "Graffiti on the bridge").await;

    // below the visibility threshold
    assert!(!admin.observe(&message.id, 0.1));
    // a sender never marks their own message
    assert!(!citizen.observe(&message.id, 1.0));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(admin.seen_requests(), 0);
    assert_eq!(citizen.seen_requests(), 0);
}

#[tokio::test]
async fn seen_state_survives_reopening_the_conversation() {
    let (addr, _state) = start_relay().await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    let message = deliver(&citizen, &mut admin_events, "Noise complaint").await;
    assert!(admin.observe(&message.id, 1.0));
    wait_for(&mut admin_events, |e| matches!(e, ChatEvent::MessagesSeen(_))).await;

    admin.close_conversation();
    admin.open_conversation(key()).await.expect("reopen");
    let stored = admin.messages();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].message.is_seen());
    // already seen in history, so nothing is re-sent
    assert!(!admin.observe(&message.id, 1.0));
}
