// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for sending, acknowledgment and retry.
//!
//! A real relay runs in-process; clients talk to it over `WsConnector` and
//! load history through `HttpHistory`, exactly as the binary does.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use civicchat::chat::history::HttpHistory;
use civicchat::chat::{ChatClient, ChatEvent, ClientSettings, SendError};
use civicchat::config::{ChatConfig, ConnectionConfig, ReconnectConfig};
use civicchat::transport::Credentials;
use civicchat::transport::connection::Connection;
use civicchat::transport::ws::WsConnector;
use civicchat_proto::message::{ConversationKey, MessageKind, UserId};
use civicchat_relay::config::RelayConfig;
use civicchat_relay::relay::{self, RelayState};
use tokio::sync::mpsc;

type Client = ChatClient<WsConnector, HttpHistory>;

async fn start_relay(state: RelayState) -> (SocketAddr, Arc<RelayState>) {
    let state = Arc::new(state);
    let (addr, _handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    (addr, state)
}

fn key() -> ConversationKey {
    ConversationKey::new("citizen".into(), "admin".into())
}

fn client(addr: SocketAddr, user: &str) -> (Client, mpsc::Receiver<ChatEvent>) {
    let connector = WsConnector::new(&format!("ws://{addr}/ws")).unwrap();
    let history = HttpHistory::new(&format!("http://{addr}/"), "token").unwrap();
    let connection = Connection::new(
        connector,
        Credentials {
            user_id: UserId::new(user),
            token: "token".into(),
        },
        ConnectionConfig {
            connect_attempts: 2,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
                ..ReconnectConfig::default()
            },
            ..ConnectionConfig::default()
        },
    );
    let settings = ClientSettings {
        chat: ChatConfig {
            ack_timeout: Duration::from_secs(3),
            event_buffer: 256,
            ..ChatConfig::default()
        },
        ..ClientSettings::default()
    };
    ChatClient::new(connection, history, settings)
}

async fn open(addr: SocketAddr, user: &str) -> (Client, mpsc::Receiver<ChatEvent>) {
    let (client, events) = client(addr, user);
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

#[tokio::test]
async fn send_is_acknowledged_and_delivered() {
    let (addr, state) = start_relay(RelayState::new()).await;
    let (citizen, _citizen_events) = open(addr, "citizen").await;
    let (admin, mut admin_events) = open(addr, "admin").await;

    let stored = citizen
        .send("Pothole on Main St", MessageKind::Text)
        .await
        .expect("send");
    assert!(!stored.id.is_local());
    assert_eq!(state.store.len().await, 1);

    let messages = citizen.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.id, stored.id);
    assert!(citizen.unsent().is_empty());

    let ChatEvent::MessageAdded(inbound) = wait_for(&mut admin_events, |e| {
        matches!(e, ChatEvent::MessageAdded(m) if m.sender_id.as_str() == "citizen")
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(inbound.id, stored.id);
    assert_eq!(admin.messages().len(), 1);
}

#[tokio::test]
async fn history_is_loaded_in_order_on_open() {
    let (addr, _state) = start_relay(RelayState::new()).await;
    let (citizen, _events) = open(addr, "citizen").await;
    for text in ["first", "second", "third"] {
        citizen
            .send(text, MessageKind::Text)
            .await
            .expect("send");
    }

    let (admin, _admin_events) = client(addr, "admin");
    admin.start().await.expect("connect");
    let loaded = admin.open_conversation(key()).await.expect("open");
    assert_eq!(loaded, 3);
    let contents: Vec<String> = admin
        .messages()
        .into_iter()
        .map(|m| m.message.content)
        .collect();
    assert_eq!(contents, ["first", "second", "third"]);

    let conversations = admin.load_conversations().await.expect("list");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].user_id, UserId::from("citizen"));
}

#[tokio::test]
async fn offline_send_is_kept_and_retried_after_reconnect() {
    let (addr, state) = start_relay(RelayState::new()).await;
    let (citizen, _events) = open(addr, "citizen").await;

    citizen.stop();
    let err = citizen
        .send("are you there?", MessageKind::Text)
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Transport(_)), "got {err:?}");

    let unsent = citizen.unsent();
    assert_eq!(unsent.len(), 1);
    assert!(unsent[0].error.is_some());
    let local_id = unsent[0].local_id.clone();
    let first_attempt_at = unsent[0].timestamp;

    citizen.start().await.expect("reconnect");
    let stored = citizen.retry(&local_id).await.expect("retry");
    assert_eq!(stored.content, "are you there?");
    assert!(citizen.unsent().is_empty());
    assert_eq!(state.store.len().await, 1);

    // server time is assigned on acknowledgment
    assert!(stored.created_at >= first_attempt_at);
}

#[tokio::test]
async fn relay_rejection_marks_the_message_failed() {
    let config = RelayConfig {
        max_content_size: 16,
        ..RelayConfig::default()
    };
    let (addr, state) = start_relay(RelayState::with_config(&config)).await;
    let (citizen, _events) = open(addr, "citizen").await;

    let err = citizen
        .send("this report is longer than sixteen bytes", MessageKind::Text)
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Rejected(_)), "got {err:?}");
    assert!(state.store.is_empty().await);

    let unsent = citizen.unsent();
    assert_eq!(unsent.len(), 1);
    assert!(unsent[0].error.is_some());

    assert!(citizen.remove_unsent(&unsent[0].local_id));
    assert!(citizen.unsent().is_empty());
    assert!(citizen.messages().is_empty());
}

#[tokio::test]
async fn retry_all_flushes_every_failed_record() {
    let (addr, state) = start_relay(RelayState::new()).await;
    let (citizen, _events) = open(addr, "citizen").await;

    citizen.stop();
    for text in ["one", "two"] {
        assert!(citizen.send(text, MessageKind::Text).await.is_err());
    }
    assert_eq!(citizen.unsent().len(), 2);

    citizen.start().await.expect("reconnect");
    let results = citizen.retry_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(citizen.unsent().is_empty());
    assert_eq!(state.store.len().await, 2);
}
