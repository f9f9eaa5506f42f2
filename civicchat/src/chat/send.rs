//! Send pipeline methods for [`ChatClient`].
//!
//! A send is validated, recorded in the retry queue and shown optimistically
//! under a `local-` id before anything touches the connection. The record
//! leaves the queue only when `message:sent` echoes its id back, or when the
//! user discards it.

use civicchat_proto::events::ClientEvent;
use civicchat_proto::message::{Message, MessageId, MessageKind, Timestamp, validate_content};
use futures_util::future::join_all;
use tokio::sync::oneshot;

use crate::transport::{Connector, EventSink};

use super::delivery::DeliveryState;
use super::history::HistorySource;
use super::retry::UnsentMessage;
use super::{AckOutcome, ChatClient, ChatEvent, ChatState, Inner, SendError};

impl<C: Connector, H: HistorySource> ChatClient<C, H> {
    /// Sends `content` to the counterpart of the active conversation and
    /// waits for the server's acknowledgment.
    ///
    /// The optimistic record appears in the store (state `Queued`) before
    /// this returns for the first time, and any typing signal is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if validation fails, no conversation is open,
    /// the connection refuses the send, the server rejects it, or no
    /// acknowledgment arrives within the configured timeout. In the last
    /// three cases the record stays in the retry queue as failed.
    pub async fn send(
        &self,
        content: impl Into<String>,
        kind: MessageKind,
    ) -> Result<Message, SendError> {
        let inner = &self.inner;
        let content = content.into();
        validate_content(&content, kind, inner.chat.max_content_size)?;

        let record = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            let key = state
                .conversations
                .active()
                .cloned()
                .ok_or(SendError::NoConversation)?;
            let receiver_id = key
                .counterpart(&inner.me)
                .cloned()
                .ok_or(SendError::NoConversation)?;
            let record = UnsentMessage::new(
                MessageId::local(),
                content,
                kind,
                receiver_id,
                key,
                Timestamp::now(),
            );
            state.retry.enqueue(record.clone());
            state.tracker.track_outbound(record.local_id.clone());
            state
                .store
                .insert(record.to_message(&inner.me), Some(DeliveryState::Queued));
            record
        };
        tracing::debug!(local_id = %record.local_id, kind = %kind, "message queued");
        inner.emit(ChatEvent::MessageAdded(record.to_message(&inner.me)));
        inner.typing.stop();

        inner.transmit(&record).await
    }

    /// Re-sends a failed record with its original content, kind, receiver
    /// and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotRetryable`] if the record is unknown, not
    /// failed, or already being retried; otherwise the same errors as
    /// [`send`](Self::send).
    pub async fn retry(&self, local_id: &MessageId) -> Result<Message, SendError> {
        let inner = &self.inner;
        let record = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            let Some(record) = state.retry.begin_retry(local_id) else {
                return Err(SendError::NotRetryable(local_id.clone()));
            };
            match state.tracker.requeue(local_id) {
                Ok(delivery) => {
                    state.store.set_delivery(local_id, delivery);
                }
                Err(e) => {
                    tracing::warn!(local_id = %local_id, error = %e, "retry refused");
                    state.retry.mark_failed(local_id, e.to_string());
                    return Err(SendError::NotRetryable(local_id.clone()));
                }
            }
            record
        };
        tracing::info!(local_id = %local_id, "retrying message");
        inner.emit(ChatEvent::DeliveryChanged {
            message_id: local_id.clone(),
            state: DeliveryState::Queued,
        });
        inner.transmit(&record).await
    }

    /// Retries every failed record concurrently.
    ///
    /// Returns one result per record, in queue order.
    pub async fn retry_all(&self) -> Vec<(MessageId, Result<Message, SendError>)> {
        let ids = self.inner.state.lock().retry.failed_ids();
        let results = join_all(ids.iter().map(|id| self.retry(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Discards an unsent record. Returns `false` if it was not queued.
    ///
    /// A send still awaiting acknowledgment resolves with
    /// [`SendError::Discarded`].
    pub fn remove_unsent(&self, local_id: &MessageId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let removed = state.retry.remove(local_id).is_some();
            if removed {
                state.tracker.forget(local_id);
                state.store.remove(local_id);
            }
            removed
        };
        if removed {
            self.inner.pending_acks.lock().remove(local_id);
            tracing::debug!(local_id = %local_id, "unsent message discarded");
        }
        removed
    }

    /// Discards every unsent record. Returns how many were removed.
    pub fn clear_unsent(&self) -> usize {
        let records = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let records = state.retry.clear();
            for record in &records {
                state.tracker.forget(&record.local_id);
                state.store.remove(&record.local_id);
            }
            records
        };
        let mut pending = self.inner.pending_acks.lock();
        for record in &records {
            pending.remove(&record.local_id);
        }
        records.len()
    }
}

impl<C: Connector, H: HistorySource> Inner<C, H> {
    /// Hands `record` to the connection and waits for its acknowledgment.
    async fn transmit(&self, record: &UnsentMessage) -> Result<Message, SendError> {
        let local_id = &record.local_id;
        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending_acks.lock().insert(local_id.clone(), ack_tx);

        let event = ClientEvent::SendMessage {
            client_id: local_id.clone(),
            conversation: record.conversation.clone(),
            receiver_id: record.receiver_id.clone(),
            content: record.content.clone(),
            kind: record.kind,
        };
        // The state lock spans publish and mark_sent so an acknowledgment
        // handled on the supervisor task always observes `Sent`.
        let published = {
            let mut state = self.state.lock();
            match self.connection.publish(event) {
                Ok(()) => {
                    if let Ok(delivery) = state.tracker.mark_sent(local_id) {
                        state.store.set_delivery(local_id, delivery);
                    }
                    Ok(())
                }
                Err(e) => {
                    self.fail_locked(&mut state, local_id, &e.to_string());
                    Err(e)
                }
            }
        };
        if let Err(e) = published {
            self.pending_acks.lock().remove(local_id);
            tracing::warn!(local_id = %local_id, error = %e, "send failed");
            self.emit_failed(local_id, &e.to_string());
            return Err(e.into());
        }
        self.emit(ChatEvent::DeliveryChanged {
            message_id: local_id.clone(),
            state: DeliveryState::Sent,
        });

        let timeout = self.chat.ack_timeout;
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(AckOutcome::Acknowledged(message))) => Ok(message),
            Ok(Ok(AckOutcome::Rejected(reason))) => Err(SendError::Rejected(reason)),
            Ok(Err(_)) => Err(SendError::Discarded(local_id.clone())),
            Err(_) => {
                self.pending_acks.lock().remove(local_id);
                let reason = "no acknowledgment from server";
                let failed = self.fail_locked(&mut self.state.lock(), local_id, reason);
                if failed {
                    tracing::warn!(local_id = %local_id, timeout = ?timeout, "acknowledgment timed out");
                    self.emit_failed(local_id, reason);
                    Err(SendError::AckTimeout(timeout))
                } else {
                    // Acknowledged between the timeout firing and the lock.
                    let acked = self
                        .state
                        .lock()
                        .store
                        .iter()
                        .find(|e| e.message.client_id.as_ref() == Some(local_id))
                        .map(|e| e.message.clone());
                    acked.ok_or(SendError::AckTimeout(timeout))
                }
            }
        }
    }

    /// Moves a record to `Failed` in the tracker, retry queue and store.
    ///
    /// Returns `false` if the tracker refused (already acknowledged or
    /// unknown), in which case nothing changes.
    pub(super) fn fail_locked(
        &self,
        state: &mut ChatState,
        local_id: &MessageId,
        reason: &str,
    ) -> bool {
        match state.tracker.fail(local_id, reason) {
            Ok(delivery) => {
                state.retry.mark_failed(local_id, reason);
                state.store.set_delivery(local_id, delivery);
                true
            }
            Err(e) => {
                tracing::debug!(local_id = %local_id, error = %e, "failure not applied");
                false
            }
        }
    }

    pub(super) fn emit_failed(&self, local_id: &MessageId, reason: &str) {
        self.emit(ChatEvent::DeliveryChanged {
            message_id: local_id.clone(),
            state: DeliveryState::Failed(reason.to_string()),
        });
    }
}
