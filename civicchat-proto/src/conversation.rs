//! Conversation summaries as served by the admin conversation list.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationKey, Timestamp, UserId};

/// Summary of one user/admin thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub user_id: UserId,
    pub admin_id: UserId,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub is_active: bool,
}

impl Conversation {
    /// An empty, inactive conversation for `key`.
    #[must_use]
    pub fn new(key: &ConversationKey) -> Self {
        Self {
            user_id: key.user_id.clone(),
            admin_id: key.admin_id.clone(),
            last_message: None,
            last_message_at: None,
            unread_count: 0,
            is_active: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.user_id.clone(), self.admin_id.clone())
    }
}
