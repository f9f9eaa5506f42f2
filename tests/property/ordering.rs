#![allow(clippy::unwrap_used)]

//! Property-based tests for message ordering and deduplication.
//!
//! Uses proptest to verify:
//! 1. The client store stays ordered by `created_at` and never holds an id
//!    twice, whatever order records arrive in.
//! 2. Swapping an optimistic record for the server copy keeps the order.
//! 3. The relay store deduplicates by `(sender, client_id)`, pages are
//!    strictly ascending and keep the sender's `client_id`.
//! 4. Arbitrary text frames never panic the event decoders.

use std::collections::HashSet;

use civicchat::chat::delivery::DeliveryState;
use civicchat::chat::store::MessageStore as ClientStore;
use civicchat_proto::codec;
use civicchat_proto::message::{ConversationKey, Message, MessageId, MessageKind, Timestamp, UserId};
use civicchat_relay::store::{MessageStore as RelayStore, NewMessage};
use proptest::prelude::*;

fn key() -> ConversationKey {
    ConversationKey::new("citizen".into(), "admin".into())
}

fn message(id: String, at: u64, from_citizen: bool) -> Message {
    let (sender, receiver) = if from_citizen {
        ("citizen", "admin")
    } else {
        ("admin", "citizen")
    };
    Message {
        id: MessageId::new(id),
        client_id: None,
        conversation: key(),
        sender_id: UserId::from(sender),
        receiver_id: UserId::from(receiver),
        sender: None,
        content: "x".into(),
        kind: MessageKind::Text,
        created_at: Timestamp::from_millis(at),
        seen_at: None,
        is_read: false,
    }
}

/// Strategy for a record drawn from a small id space, so duplicates occur.
fn arb_message() -> impl Strategy<Value = Message> {
    (0u8..16, 0u64..1_000, any::<bool>())
        .prop_map(|(id, at, from_citizen)| message(format!("srv-{id}"), at, from_citizen))
}

proptest! {
    #[test]
    fn client_store_is_ordered_and_deduplicated(messages in prop::collection::vec(arb_message(), 0..64)) {
        let mut store = ClientStore::new();
        for m in &messages {
            store.insert(m.clone(), None);
        }
        prop_assert!(store.is_ordered());

        let distinct: HashSet<&MessageId> = messages.iter().map(|m| &m.id).collect();
        prop_assert_eq!(store.len(), distinct.len());

        let stored: Vec<&MessageId> = store.iter().map(|e| &e.message.id).collect();
        let unique: HashSet<&MessageId> = stored.iter().copied().collect();
        prop_assert_eq!(unique.len(), stored.len());
    }

    #[test]
    fn replacing_local_records_keeps_order(
        history in prop::collection::vec(0u64..1_000, 0..32),
        local_at in 0u64..1_000,
        server_at in 0u64..1_000,
    ) {
        let mut store = ClientStore::new();
        for (i, at) in history.iter().enumerate() {
            store.insert(message(format!("srv-{i}"), *at, false), None);
        }
        let local_id = MessageId::local();
        let mut local = message(String::new(), local_at, true);
        local.id = local_id.clone();
        store.insert(local, Some(DeliveryState::Sent));
        prop_assert!(store.is_ordered());

        let server = message("srv-ack".into(), server_at, true);
        store.replace_local(&local_id, server, DeliveryState::Acknowledged);
        prop_assert!(store.is_ordered());
        prop_assert!(!store.contains(&local_id));
        prop_assert_eq!(store.len(), history.len() + 1);
        prop_assert_eq!(
            store.get(&MessageId::new("srv-ack")).and_then(|e| e.delivery.clone()),
            Some(DeliveryState::Acknowledged)
        );
    }

    #[test]
    fn relay_store_dedups_by_sender_and_client_id(
        sends in prop::collection::vec((0u8..8, any::<bool>()), 1..40),
        limit in 1u32..50,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = RelayStore::new();
            for (client, from_citizen) in &sends {
                let (sender, receiver) = if *from_citizen {
                    ("citizen", "admin")
                } else {
                    ("admin", "citizen")
                };
                store
                    .append(NewMessage {
                        client_id: MessageId::new(format!("local-{client}")),
                        conversation: key(),
                        sender_id: sender.into(),
                        receiver_id: receiver.into(),
                        content: "x".into(),
                        kind: MessageKind::Text,
                    })
                    .await;
            }

            let distinct: HashSet<(u8, bool)> = sends.iter().copied().collect();
            prop_assert_eq!(store.len().await, distinct.len());

            let page = store.page(&key(), limit, None).await;
            let expected = distinct.len().min(usize::try_from(limit).unwrap());
            prop_assert_eq!(page.len(), expected);
            prop_assert!(page.windows(2).all(|w| w[0].created_at < w[1].created_at));
            prop_assert!(page.iter().all(|m| m.client_id.as_ref().is_some_and(MessageId::is_local)));
            Ok(())
        })?;
    }

    #[test]
    fn decoders_never_panic(text in ".{0,256}") {
        let _ = codec::decode_server(&text);
        let _ = codec::decode_client(&text);
    }
}
