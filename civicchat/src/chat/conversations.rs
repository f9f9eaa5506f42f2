//! Per-conversation summaries and unread counting.
//!
//! `unread_count` grows by one per distinct inbound message while its
//! conversation is not the active one and drops to zero when the
//! conversation is activated. Ids counted for a conversation are forgotten
//! once it is activated.

use std::collections::{HashMap, HashSet};

use civicchat_proto::conversation::Conversation;
use civicchat_proto::message::{ConversationKey, Message, MessageId, UserId};

#[derive(Debug)]
pub struct ConversationBook {
    viewer: UserId,
    conversations: HashMap<ConversationKey, Conversation>,
    active: Option<ConversationKey>,
    /// Inbound ids already counted, per conversation.
    counted: HashMap<ConversationKey, HashSet<MessageId>>,
}

impl ConversationBook {
    #[must_use]
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            conversations: HashMap::new(),
            active: None,
            counted: HashMap::new(),
        }
    }

    /// Replaces summaries with a freshly fetched list. The active flag is
    /// recomputed locally.
    pub fn load(&mut self, list: Vec<Conversation>) {
        self.conversations = list
            .into_iter()
            .map(|mut c| {
                let key = c.key();
                c.is_active = self.active.as_ref() == Some(&key);
                if c.is_active {
                    c.unread_count = 0;
                }
                (key, c)
            })
            .collect();
    }

    /// Applies an inbound (or own) message. Returns `true` if the unread
    /// count changed.
    pub fn on_message(&mut self, message: &Message) -> bool {
        let key = message.conversation.clone();
        let is_active = self.active.as_ref() == Some(&key);
        let entry = self
            .conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(&key));
        if entry
            .last_message_at
            .is_none_or(|at| at <= message.created_at)
        {
            entry.last_message = Some(message.content.clone());
            entry.last_message_at = Some(message.created_at);
        }
        if is_active || message.sender_id == self.viewer || message.is_seen() {
            return false;
        }
        if !self
            .counted
            .entry(key)
            .or_default()
            .insert(message.id.clone())
        {
            return false;
        }
        entry.unread_count += 1;
        true
    }

    /// Makes `key` the viewed conversation and resets its unread count.
    pub fn activate(&mut self, key: &ConversationKey) {
        if let Some(previous) = self.active.take() {
            if let Some(c) = self.conversations.get_mut(&previous) {
                c.is_active = false;
            }
        }
        let entry = self
            .conversations
            .entry(key.clone())
            .or_insert_with(|| Conversation::new(key));
        entry.is_active = true;
        entry.unread_count = 0;
        self.counted.remove(key);
        self.active = Some(key.clone());
    }

    /// No conversation is viewed any more.
    pub fn deactivate(&mut self) {
        if let Some(previous) = self.active.take() {
            if let Some(c) = self.conversations.get_mut(&previous) {
                c.is_active = false;
            }
        }
    }

    #[must_use]
    pub const fn active(&self) -> Option<&ConversationKey> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn get(&self, key: &ConversationKey) -> Option<&Conversation> {
        self.conversations.get(key)
    }

    #[must_use]
    pub fn unread(&self, key: &ConversationKey) -> u32 {
        self.get(key).map_or(0, |c| c.unread_count)
    }

    /// All summaries, most recent activity first.
    #[must_use]
    pub fn list(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = self.conversations.values().cloned().collect();
        list.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        list
    }
}
