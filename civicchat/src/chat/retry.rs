//! Holding area for messages whose send has not been acknowledged.
//!
//! A record is enqueued the instant a send is triggered and removed only
//! when the server acknowledges it or the user discards it. Failed records
//! keep their error string until they are retried.

use civicchat_proto::message::{
    ConversationKey, Message, MessageId, MessageKind, Timestamp, UserId,
};

/// Everything needed to re-send a message unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentMessage {
    pub local_id: MessageId,
    pub content: String,
    pub kind: MessageKind,
    pub receiver_id: UserId,
    pub conversation: ConversationKey,
    /// When the send was first triggered; retries keep it.
    pub timestamp: Timestamp,
    /// Last failure cause, if the record has failed.
    pub error: Option<String>,
    pub is_retrying: bool,
}

impl UnsentMessage {
    /// A record in its initial state: no error, not retrying.
    #[must_use]
    pub fn new(
        local_id: MessageId,
        content: String,
        kind: MessageKind,
        receiver_id: UserId,
        conversation: ConversationKey,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            local_id,
            content,
            kind,
            receiver_id,
            conversation,
            timestamp,
            error: None,
            is_retrying: false,
        }
    }

    /// The optimistic store record shown while the send is outstanding.
    #[must_use]
    pub fn to_message(&self, sender_id: &UserId) -> Message {
        Message {
            id: self.local_id.clone(),
            client_id: Some(self.local_id.clone()),
            conversation: self.conversation.clone(),
            sender_id: sender_id.clone(),
            receiver_id: self.receiver_id.clone(),
            content: self.content.clone(),
            kind: self.kind,
            created_at: self.timestamp,
            seen_at: None,
            is_read: false,
            sender: None,
        }
    }

    /// Failed and not currently being retried.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        self.error.is_some() && !self.is_retrying
    }
}

/// Insertion-ordered unsent records.
#[derive(Debug, Default)]
pub struct RetryQueue {
    records: Vec<UnsentMessage>,
}

impl RetryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn find_mut(&mut self, local_id: &MessageId) -> Option<&mut UnsentMessage> {
        self.records.iter_mut().find(|r| &r.local_id == local_id)
    }

    #[must_use]
    pub fn get(&self, local_id: &MessageId) -> Option<&UnsentMessage> {
        self.records.iter().find(|r| &r.local_id == local_id)
    }

    /// Adds a record. A record with the same local id is replaced.
    pub fn enqueue(&mut self, record: UnsentMessage) {
        match self.find_mut(&record.local_id) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    /// Records a failure; the record stays queued with `error` set.
    pub fn mark_failed(&mut self, local_id: &MessageId, error: impl Into<String>) -> bool {
        self.find_mut(local_id).is_some_and(|r| {
            r.error = Some(error.into());
            r.is_retrying = false;
            true
        })
    }

    /// Flags a failed record as retrying and returns a copy of its payload.
    ///
    /// Returns `None` for unknown ids and for records that are not failed
    /// or already being retried.
    pub fn begin_retry(&mut self, local_id: &MessageId) -> Option<UnsentMessage> {
        let record = self.find_mut(local_id)?;
        if !record.is_failed() {
            return None;
        }
        record.is_retrying = true;
        Some(record.clone())
    }

    /// Removes a record after acknowledgment.
    pub fn complete(&mut self, local_id: &MessageId) -> Option<UnsentMessage> {
        self.remove(local_id)
    }

    /// Removes a record. No network effect.
    pub fn remove(&mut self, local_id: &MessageId) -> Option<UnsentMessage> {
        let at = self.records.iter().position(|r| &r.local_id == local_id)?;
        Some(self.records.remove(at))
    }

    /// Removes every record and returns them.
    pub fn clear(&mut self) -> Vec<UnsentMessage> {
        std::mem::take(&mut self.records)
    }

    /// Ids of every failed, non-retrying record, oldest first.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<MessageId> {
        self.records
            .iter()
            .filter(|r| r.is_failed())
            .map(|r| r.local_id.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &UnsentMessage> {
        self.records.iter()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<UnsentMessage> {
        self.records.clone()
    }
}
