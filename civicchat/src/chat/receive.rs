//! Inbound event handling for [`ChatClient`](super::ChatClient).
//!
//! Every handler runs on the connection's supervisor task, takes the state
//! lock once, and emits [`ChatEvent`]s only after releasing it.

use civicchat_proto::events::{PresenceNotice, SeenReceipt, SendRejection, ServerEvent};
use civicchat_proto::message::{Message, UserId};

use crate::transport::Connector;

use super::delivery::DeliveryState;
use super::history::HistorySource;
use super::{AckOutcome, ChatEvent, Inner};

impl<C: Connector, H: HistorySource> Inner<C, H> {
    pub(super) fn on_event(&self, event: &ServerEvent) {
        match event {
            ServerEvent::MessageReceived(message) => self.on_message_received(message),
            ServerEvent::MessageSent(message) => self.on_message_sent(message),
            ServerEvent::MessageError(rejection) => self.on_message_error(rejection),
            ServerEvent::MessagesSeen(receipt) => self.on_messages_seen(receipt),
            ServerEvent::TypingStarted(notice) => {
                if self.is_counterpart(&notice.user_id) {
                    self.remote_typing.on_start(&notice.user_id);
                }
            }
            ServerEvent::TypingStopped(notice) => self.remote_typing.on_stop(&notice.user_id),
            ServerEvent::Presence(notice) => self.on_presence(notice),
            ServerEvent::Error { reason } => {
                tracing::warn!(reason = %reason, "server reported an error");
                self.emit(ChatEvent::ServerError(reason.clone()));
            }
            ServerEvent::SessionReady { .. } => {}
        }
    }

    fn is_counterpart(&self, user: &UserId) -> bool {
        self.counterpart().as_ref() == Some(user)
    }

    /// A message addressed to the viewer.
    ///
    /// Stored only when it belongs to the active conversation; otherwise it
    /// only updates the conversation summary and unread count.
    fn on_message_received(&self, message: &Message) {
        if message.receiver_id != self.me && message.sender_id != self.me {
            tracing::debug!(message_id = %message.id, "message for another user ignored");
            return;
        }
        let (added, unread) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let unread_changed = state.conversations.on_message(message);
            let is_active = state.conversations.active() == Some(&message.conversation);
            let added = is_active && state.store.insert(message.clone(), None);
            if added {
                if message.sender_id == self.me {
                    state.tracker.track_own(message.id.clone());
                } else {
                    state
                        .tracker
                        .track_inbound(message.id.clone(), message.is_seen());
                }
            }
            let unread =
                unread_changed.then(|| state.conversations.unread(&message.conversation));
            (added, unread)
        };
        if added {
            tracing::debug!(message_id = %message.id, "message received");
            self.remote_typing.on_stop(&message.sender_id);
            self.emit(ChatEvent::MessageAdded(message.clone()));
        }
        if let Some(unread_count) = unread {
            self.emit(ChatEvent::ConversationUpdated {
                key: message.conversation.clone(),
                unread_count,
            });
        }
    }

    /// Self-confirmation of a send.
    ///
    /// A tracked `client_id` swaps the optimistic record for the server copy
    /// and completes the retry record; the waiting send is always resolved.
    /// Without a tracked id (sent from another tab) the record is simply
    /// added.
    fn on_message_sent(&self, message: &Message) {
        let local_id = message.client_id.clone();
        let replaced = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let is_active = state.conversations.active() == Some(&message.conversation);
            state.conversations.on_message(message);
            let tracked = local_id
                .as_ref()
                .filter(|id| state.tracker.outbound_state(id).is_some());
            match tracked {
                Some(local) => {
                    if let Err(e) = state.tracker.acknowledge(local, &message.id) {
                        tracing::debug!(local_id = %local, error = %e, "duplicate acknowledgment");
                    }
                    state.retry.complete(local);
                    if is_active {
                        state.store.replace_local(
                            local,
                            message.clone(),
                            DeliveryState::Acknowledged,
                        );
                    }
                    Some(local.clone())
                }
                None => {
                    state.tracker.track_own(message.id.clone());
                    if is_active {
                        state
                            .store
                            .insert(message.clone(), Some(DeliveryState::Acknowledged));
                    }
                    None
                }
            }
        };

        match replaced {
            Some(local_id) => {
                tracing::debug!(local_id = %local_id, message_id = %message.id, "message acknowledged");
                self.complete_ack(local_id, message.clone());
            }
            None => {
                if let Some(tx) = local_id.and_then(|id| self.pending_acks.lock().remove(&id)) {
                    // The sender may have given up already.
                    let _ = tx.send(AckOutcome::Acknowledged(message.clone()));
                }
                self.emit(ChatEvent::MessageAdded(message.clone()));
            }
        }
    }

    fn on_message_error(&self, rejection: &SendRejection) {
        let local_id = &rejection.client_id;
        let failed = self.fail_locked(&mut self.state.lock(), local_id, &rejection.reason);
        if let Some(tx) = self.pending_acks.lock().remove(local_id) {
            let _ = tx.send(AckOutcome::Rejected(rejection.reason.clone()));
        }
        tracing::warn!(local_id = %local_id, reason = %rejection.reason, "send rejected");
        if failed {
            self.emit_failed(local_id, &rejection.reason);
        }
    }

    /// Server confirmation of seen messages. This is the only place
    /// `seen_at` is set.
    fn on_messages_seen(&self, receipt: &SeenReceipt) {
        self.seen.confirm(&receipt.message_ids);
        let changed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let changed = state.store.mark_seen(&receipt.message_ids, receipt.seen_at);
            for id in &changed {
                // Own messages seen by the counterpart are expected here.
                let _ = state.tracker.mark_seen(id);
            }
            changed
        };
        if !changed.is_empty() {
            tracing::debug!(count = changed.len(), "messages seen");
            self.emit(ChatEvent::MessagesSeen(changed));
        }
    }

    fn on_presence(&self, notice: &PresenceNotice) {
        let changed = self.state.lock().presence.update(notice);
        if changed {
            tracing::debug!(user_id = %notice.user_id, online = notice.is_online, "presence changed");
            self.emit(ChatEvent::PresenceChanged {
                user_id: notice.user_id.clone(),
                is_online: notice.is_online,
            });
        }
    }
}
