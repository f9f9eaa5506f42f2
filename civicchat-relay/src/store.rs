//! In-memory message store for the relay.
//!
//! The [`MessageStore`] holds every conversation's messages in `created_at`
//! order, assigns server ids, deduplicates re-sent messages by
//! `(sender, client_id)`, and records seen receipts. It backs both the
//! WebSocket hub and the REST history endpoints.
//!
//! Stored records keep the sender's `client_id`, so a client that missed
//! its `message:sent` can still correlate its local record from history.

use std::collections::HashMap;

use civicchat_proto::conversation::Conversation;
use civicchat_proto::message::{
    ConversationKey, Message, MessageId, MessageKind, SenderProfile, Timestamp, UserId,
};
use tokio::sync::RwLock;

/// Default cap on a single history page.
pub const DEFAULT_HISTORY_LIMIT: u32 = 200;

/// A validated send, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub client_id: MessageId,
    pub conversation: ConversationKey,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub kind: MessageKind,
}

/// Result of [`MessageStore::append`].
#[derive(Debug, Clone)]
pub struct Appended {
    /// The stored record, `client_id` included.
    pub message: Message,
    /// `true` if the same `(sender, client_id)` was stored before.
    pub duplicate: bool,
}

/// Result of [`MessageStore::mark_seen`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeenUpdate {
    /// Every requested id the viewer received, seen before or not.
    pub confirmed: Vec<MessageId>,
    /// Ids that were unseen until now, grouped by their sender.
    pub newly_seen: HashMap<UserId, Vec<MessageId>>,
}

#[derive(Debug, Default)]
struct Inner {
    conversations: HashMap<ConversationKey, Vec<Message>>,
    /// Message id to conversation, for seen receipts.
    index: HashMap<MessageId, ConversationKey>,
    /// `(sender, client_id)` to server id.
    client_ids: HashMap<(UserId, MessageId), MessageId>,
    /// Last `created_at` handed out, to keep per-store timestamps strictly
    /// increasing.
    last_created: u64,
}

/// Conversation messages keyed by participants.
///
/// Thread-safe via [`RwLock`].
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: RwLock<Inner>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message under a fresh server id and `created_at`.
    ///
    /// A repeated `(sender, client_id)` returns the original record instead
    /// of storing a second copy.
    pub async fn append(&self, new: NewMessage) -> Appended {
        let mut inner = self.inner.write().await;
        let dedup_key = (new.sender_id.clone(), new.client_id.clone());
        if let Some(existing) = inner.client_ids.get(&dedup_key).cloned() {
            if let Some(message) = inner.find(&existing) {
                return Appended {
                    message: message.clone(),
                    duplicate: true,
                };
            }
        }

        let now = Timestamp::now().as_millis().max(inner.last_created + 1);
        inner.last_created = now;
        let message = Message {
            id: MessageId::generate(),
            client_id: Some(new.client_id),
            conversation: new.conversation.clone(),
            sender: Some(SenderProfile {
                username: new.sender_id.to_string(),
                avatar_url: None,
            }),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            kind: new.kind,
            created_at: Timestamp::from_millis(now),
            seen_at: None,
            is_read: false,
        };
        inner.client_ids.insert(dedup_key, message.id.clone());
        inner
            .index
            .insert(message.id.clone(), new.conversation.clone());
        inner
            .conversations
            .entry(new.conversation)
            .or_default()
            .push(message.clone());
        drop(inner);

        Appended {
            message,
            duplicate: false,
        }
    }

    /// Marks the listed messages as seen by `viewer`.
    ///
    /// Only messages `viewer` received are affected; unknown ids and the
    /// viewer's own messages are ignored.
    pub async fn mark_seen(&self, viewer: &UserId, ids: &[MessageId], at: Timestamp) -> SeenUpdate {
        let mut inner = self.inner.write().await;
        let mut update = SeenUpdate::default();
        for id in ids {
            let Some(key) = inner.index.get(id).cloned() else {
                continue;
            };
            let Some(message) = inner
                .conversations
                .get_mut(&key)
                .and_then(|list| list.iter_mut().find(|m| &m.id == id))
            else {
                continue;
            };
            if &message.receiver_id != viewer {
                continue;
            }
            if message.seen_at.is_none() {
                message.seen_at = Some(at);
                message.is_read = true;
                update
                    .newly_seen
                    .entry(message.sender_id.clone())
                    .or_default()
                    .push(id.clone());
            }
            update.confirmed.push(id.clone());
        }
        update
    }

    /// The latest `limit` messages created before `before`, ascending.
    pub async fn page(
        &self,
        key: &ConversationKey,
        limit: u32,
        before: Option<Timestamp>,
    ) -> Vec<Message> {
        let inner = self.inner.read().await;
        let Some(list) = inner.conversations.get(key) else {
            return Vec::new();
        };
        let end = before.map_or(list.len(), |b| list.partition_point(|m| m.created_at < b));
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let start = end.saturating_sub(limit);
        list[start..end].to_vec()
    }

    /// Summaries of every conversation `admin_id` takes part in, most
    /// recent first.
    pub async fn conversations(&self, admin_id: &UserId) -> Vec<Conversation> {
        let inner = self.inner.read().await;
        let mut list: Vec<Conversation> = inner
            .conversations
            .iter()
            .filter(|(key, _)| &key.admin_id == admin_id)
            .map(|(key, messages)| {
                let mut summary = Conversation::new(key);
                if let Some(last) = messages.last() {
                    summary.last_message = Some(last.content.clone());
                    summary.last_message_at = Some(last.created_at);
                }
                let unread = messages
                    .iter()
                    .filter(|m| &m.receiver_id == admin_id && !m.is_seen())
                    .count();
                summary.unread_count = u32::try_from(unread).unwrap_or(u32::MAX);
                summary
            })
            .collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }

    /// Number of stored messages across all conversations.
    pub async fn len(&self) -> usize {
        self.inner.read().await.index.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Inner {
    fn find(&self, id: &MessageId) -> Option<&Message> {
        let key = self.index.get(id)?;
        self.conversations.get(key)?.iter().find(|m| &m.id == id)
    }
}
