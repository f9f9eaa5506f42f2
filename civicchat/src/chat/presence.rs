//! Last-known online status of counterparts.

use std::collections::HashMap;

use civicchat_proto::events::PresenceNotice;
use civicchat_proto::message::UserId;

#[derive(Debug, Default)]
pub struct PresenceBook {
    online: HashMap<UserId, bool>,
}

impl PresenceBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a `presence:online` notice. Returns `true` if the value changed.
    pub fn update(&mut self, notice: &PresenceNotice) -> bool {
        self.online.insert(notice.user_id.clone(), notice.is_online) != Some(notice.is_online)
    }

    /// `None` until a notice for `user` has been seen.
    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<bool> {
        self.online.get(user).copied()
    }

    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.get(user).unwrap_or(false)
    }
}
