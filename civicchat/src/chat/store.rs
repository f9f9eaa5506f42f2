//! Client-side message store for the active conversation.
//!
//! Records are kept in non-decreasing `created_at` order at all times;
//! records with equal timestamps keep their arrival order. Ids are unique:
//! inserting an id that is already present is a no-op, which is what makes
//! at-least-once delivery from the server safe.

use std::collections::HashSet;

use civicchat_proto::message::{Message, MessageId, Timestamp, UserId};

use super::delivery::DeliveryState;

/// A message plus its client-local delivery state.
///
/// `delivery` is only set for messages this client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    pub delivery: Option<DeliveryState>,
}

/// Ordered, deduplicated message records.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<StoredMessage>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.position(id).map(|i| &self.entries[i])
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.entries.iter().position(|e| &e.message.id == id)
    }

    /// Inserts `message` at its `created_at` position.
    ///
    /// Returns `false` without changing anything if the id is already stored.
    pub fn insert(&mut self, message: Message, delivery: Option<DeliveryState>) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| e.message.created_at <= message.created_at);
        self.entries.insert(at, StoredMessage { message, delivery });
        true
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<StoredMessage> {
        let at = self.position(id)?;
        self.ids.remove(id);
        Some(self.entries.remove(at))
    }

    /// Updates the delivery state of a stored record.
    pub fn set_delivery(&mut self, id: &MessageId, state: DeliveryState) -> bool {
        match self.position(id) {
            Some(i) => {
                self.entries[i].delivery = Some(state);
                true
            }
            None => false,
        }
    }

    /// Swaps the optimistic record `local_id` for the server's copy.
    ///
    /// The server record is re-positioned by its own `created_at`. If the
    /// server id is already present (duplicate acknowledgment), only the local
    /// record is dropped and the existing record's delivery is updated.
    pub fn replace_local(&mut self, local_id: &MessageId, server: Message, state: DeliveryState) {
        self.remove(local_id);
        let id = server.id.clone();
        if !self.insert(server, Some(state.clone())) {
            self.set_delivery(&id, state);
        }
    }

    /// Stamps `seen_at` on every listed record that has none yet.
    ///
    /// Returns the ids that changed.
    pub fn mark_seen(&mut self, ids: &[MessageId], seen_at: Timestamp) -> Vec<MessageId> {
        let wanted: HashSet<&MessageId> = ids.iter().collect();
        let mut changed = Vec::new();
        for entry in &mut self.entries {
            let msg = &mut entry.message;
            if wanted.contains(&msg.id) && msg.seen_at.is_none() {
                msg.seen_at = Some(seen_at);
                msg.is_read = true;
                changed.push(msg.id.clone());
            }
        }
        changed
    }

    /// Merges a history page into the store.
    ///
    /// Records absent from `history` are kept, including live messages that
    /// arrived while the page was being fetched. A record already stored
    /// takes the page's seen state. A local record named by the `client_id`
    /// of one of `viewer`'s history records is replaced by it.
    ///
    /// Messages sent by `viewer` are marked acknowledged since the server
    /// holds them.
    pub fn hydrate(&mut self, history: Vec<Message>, viewer: &UserId) {
        for message in history {
            if &message.sender_id != viewer {
                self.merge(message, None);
                continue;
            }
            if let Some(local) = message.client_id.as_ref().filter(|id| id.is_local()) {
                self.remove(local);
            }
            self.merge(message, Some(DeliveryState::Acknowledged));
        }
    }

    fn merge(&mut self, message: Message, delivery: Option<DeliveryState>) {
        let Some(i) = self.position(&message.id) else {
            self.insert(message, delivery);
            return;
        };
        let entry = &mut self.entries[i];
        if entry.message.seen_at.is_none() {
            entry.message.seen_at = message.seen_at;
        }
        entry.message.is_read |= message.is_read;
        if entry.delivery.is_none() {
            entry.delivery = delivery;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &StoredMessage> {
        self.entries.iter()
    }

    /// Copy of all records, in render order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.entries.clone()
    }

    /// Returns `true` if records are in non-decreasing `created_at` order.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].message.created_at <= w[1].message.created_at)
    }
}
