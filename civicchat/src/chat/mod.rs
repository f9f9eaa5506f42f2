//! Chat client core for `CivicChat`.
//!
//! Contains the [`ChatClient`] which ties the connection, the message store,
//! delivery tracking, the retry queue, seen-marking, typing signals, presence
//! and the conversation list together. The send pipeline lives in
//! [`send`](self::send), inbound event handling in [`receive`](self::receive).

pub mod conversations;
pub mod delivery;
pub mod history;
pub mod presence;
pub mod receive;
pub mod retry;
pub mod seen;
pub mod send;
pub mod store;
pub mod typing;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use civicchat_proto::conversation::Conversation;
use civicchat_proto::events::{EventKind, ServerEvent};
use civicchat_proto::message::{ConversationKey, Message, MessageId, UserId, ValidationError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::{ChatConfig, ClientConfig, SeenConfig, TypingConfig};
use crate::transport::connection::{Connection, ConnectionState};
use crate::transport::{ConnectionError, Connector, EventSink, TransportError};
use crate::visibility::VisibilityGate;

use conversations::ConversationBook;
use delivery::{DeliveryState, DeliveryTracker};
use history::{HistoryError, HistoryQuery, HistorySource};
use presence::PresenceBook;
use retry::{RetryQueue, UnsentMessage};
use seen::SeenCoordinator;
use store::{MessageStore, StoredMessage};
use typing::{RemoteTyping, TypingSignaler, TypingState};

/// Errors that can occur when sending or retrying a message.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Content validation failed (empty, too large, bad location).
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// No conversation is open, so there is no receiver.
    #[error("no conversation is open")]
    NoConversation,

    /// The connection did not accept the send.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server answered with `message:error`.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// No `message:sent` arrived in time.
    #[error("no acknowledgment within {0:?}")]
    AckTimeout(Duration),

    /// The record is not failed, is already being retried, or is unknown.
    #[error("message {0} cannot be retried")]
    NotRetryable(MessageId),

    /// The record was discarded while its acknowledgment was awaited.
    #[error("message {0} was discarded before acknowledgment")]
    Discarded(MessageId),
}

/// Events emitted by the [`ChatClient`] for UI notification.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A record entered the active conversation's store.
    MessageAdded(Message),
    /// An optimistic record was replaced by the server's copy.
    MessageReplaced {
        local_id: MessageId,
        message: Message,
    },
    /// A message's delivery state changed.
    DeliveryChanged {
        message_id: MessageId,
        state: DeliveryState,
    },
    /// Records newly stamped with `seen_at`.
    MessagesSeen(Vec<MessageId>),
    /// The counterpart's typing indicator changed.
    TypingChanged(TypingState),
    /// A user's presence changed.
    PresenceChanged { user_id: UserId, is_online: bool },
    /// A conversation's summary or unread count changed.
    ConversationUpdated {
        key: ConversationKey,
        unread_count: u32,
    },
    /// History for the active conversation was loaded.
    ConversationLoaded {
        key: ConversationKey,
        messages: usize,
    },
    /// The server reported a general error.
    ServerError(String),
}

/// Result delivered to a send awaiting its acknowledgment.
#[derive(Debug)]
enum AckOutcome {
    Acknowledged(Message),
    Rejected(String),
}

/// Everything guarded by the single state lock.
#[derive(Debug)]
struct ChatState {
    store: MessageStore,
    tracker: DeliveryTracker,
    retry: RetryQueue,
    presence: PresenceBook,
    conversations: ConversationBook,
}

/// Inbound event kinds the client handles.
const HANDLED: [EventKind; 8] = [
    EventKind::MessageReceived,
    EventKind::MessageSent,
    EventKind::MessageError,
    EventKind::MessagesSeen,
    EventKind::TypingStart,
    EventKind::TypingStop,
    EventKind::Presence,
    EventKind::Error,
];

struct Inner<C: Connector, H: HistorySource> {
    me: UserId,
    chat: ChatConfig,
    connection: Connection<C>,
    history: H,
    /// Lock order: `state`, then the seen coordinator, then the connection.
    state: Mutex<ChatState>,
    seen: SeenCoordinator,
    typing: TypingSignaler,
    remote_typing: RemoteTyping,
    gate: Mutex<VisibilityGate>,
    pending_acks: Mutex<HashMap<MessageId, oneshot::Sender<AckOutcome>>>,
    event_tx: mpsc::Sender<ChatEvent>,
}

impl<C: Connector, H: HistorySource> Inner<C, H> {
    /// Resolves the send waiting on `local_id`, if any, and reports the
    /// swap to the server copy.
    fn complete_ack(&self, local_id: MessageId, message: Message) {
        if let Some(tx) = self.pending_acks.lock().remove(&local_id) {
            let _ = tx.send(AckOutcome::Acknowledged(message.clone()));
        }
        self.emit(ChatEvent::DeliveryChanged {
            message_id: local_id.clone(),
            state: DeliveryState::Acknowledged,
        });
        self.emit(ChatEvent::MessageReplaced { local_id, message });
    }

    fn emit(&self, event: ChatEvent) {
        if let Err(e) = self.event_tx.try_send(event) {
            tracing::debug!(error = %e, "chat event dropped");
        }
    }

    fn active(&self) -> Option<ConversationKey> {
        self.state.lock().conversations.active().cloned()
    }

    fn counterpart(&self) -> Option<UserId> {
        let key = self.active()?;
        key.counterpart(&self.me).cloned()
    }
}

/// Client-side chat core for one user.
///
/// Cheap to clone; clones share all state. Inbound events are handled on the
/// connection's supervisor task and surfaced through the [`ChatEvent`]
/// receiver returned by [`new`](Self::new).
pub struct ChatClient<C: Connector, H: HistorySource> {
    inner: Arc<Inner<C, H>>,
}

impl<C: Connector, H: HistorySource> Clone for ChatClient<C, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector, H: HistorySource> std::fmt::Debug for ChatClient<C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("me", &self.inner.me)
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

/// The tuning a [`ChatClient`] needs, split out of [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub chat: ChatConfig,
    pub seen: SeenConfig,
    pub typing: TypingConfig,
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chat: config.chat.clone(),
            seen: config.seen.clone(),
            typing: config.typing.clone(),
        }
    }
}

impl<C: Connector, H: HistorySource> ChatClient<C, H> {
    /// Creates a client over an unconnected `connection`.
    ///
    /// Returns the client and a receiver for [`ChatEvent`]s that the UI
    /// layer should consume. Nothing is subscribed or dialed until
    /// [`start`](Self::start).
    pub fn new(
        connection: Connection<C>,
        history: H,
        settings: ClientSettings,
    ) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (event_tx, event_rx) = mpsc::channel(settings.chat.event_buffer);
        let me = connection.credentials().user_id.clone();
        let sink: Arc<dyn EventSink> = Arc::new(connection.clone());

        let typing_tx = event_tx.clone();
        let remote_typing = RemoteTyping::new(
            settings.typing.remote_expiry,
            Some(Box::new(move |state: &TypingState| {
                if let Err(e) = typing_tx.try_send(ChatEvent::TypingChanged(state.clone())) {
                    tracing::debug!(error = %e, "typing event dropped");
                }
            })),
        );

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<C, H>>| {
            let mut gate = VisibilityGate::new();
            for kind in HANDLED {
                let weak = weak.clone();
                gate.register(
                    connection.bus(),
                    kind,
                    Arc::new(move |event: &ServerEvent| {
                        if let Some(inner) = weak.upgrade() {
                            inner.on_event(event);
                        }
                    }),
                );
            }
            Inner {
                state: Mutex::new(ChatState {
                    store: MessageStore::new(),
                    tracker: DeliveryTracker::new(),
                    retry: RetryQueue::new(),
                    presence: PresenceBook::new(),
                    conversations: ConversationBook::new(me.clone()),
                }),
                seen: SeenCoordinator::new(me.clone(), settings.seen, Arc::clone(&sink)),
                typing: TypingSignaler::new(sink, settings.typing.idle),
                remote_typing,
                gate: Mutex::new(gate),
                pending_acks: Mutex::new(HashMap::new()),
                chat: settings.chat,
                connection,
                history,
                event_tx,
                me,
            }
        });
        (Self { inner }, event_rx)
    }

    /// Subscribes the event handlers and connects.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if every connection attempt failed. The
    /// handlers stay subscribed so a later [`reconnect`](Self::reconnect)
    /// resumes normally.
    pub async fn start(&self) -> Result<(), ConnectionError> {
        self.inner.gate.lock().show(self.inner.connection.bus());
        self.inner.connection.connect().await
    }

    /// Connects again after [`start`](Self::start) gave up.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub async fn reconnect(&self) -> Result<(), ConnectionError> {
        self.inner.connection.connect().await
    }

    /// Stops typing, drops the pending seen batch, unsubscribes and
    /// disconnects.
    pub fn stop(&self) {
        self.inner.typing.stop();
        self.inner.seen.cancel();
        self.inner.remote_typing.clear();
        self.inner.gate.lock().hide();
        self.inner.connection.disconnect();
        tracing::info!(user_id = %self.inner.me, "chat client stopped");
    }

    /// The host became hidden: inbound handling pauses, the pending seen
    /// batch is dropped and any typing signal is stopped. The connection
    /// stays open.
    pub fn hide(&self) {
        if self.inner.gate.lock().hide() {
            self.inner.seen.cancel();
            self.inner.typing.stop();
            self.inner.remote_typing.clear();
        }
    }

    /// The host became visible again: handlers are re-subscribed once and
    /// the active conversation is refreshed from history, since events were
    /// missed while hidden.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the refresh failed; handlers are resumed
    /// regardless.
    pub async fn show(&self) -> Result<(), HistoryError> {
        let resumed = self.inner.gate.lock().show(self.inner.connection.bus());
        if resumed {
            self.refresh().await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.inner.gate.lock().is_visible()
    }

    /// Makes `key` the active conversation and loads its history.
    ///
    /// Unread count is reset, typing and seen state from the previous
    /// conversation are dropped, and unsent records for `key` are restored
    /// into the store. Returns the number of history records loaded.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if history could not be fetched; the
    /// conversation stays active with only its local records.
    pub async fn open_conversation(&self, key: ConversationKey) -> Result<usize, HistoryError> {
        let inner = &self.inner;
        inner.seen.cancel();
        inner.typing.stop();
        inner.remote_typing.clear();
        {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            state.conversations.activate(&key);
            state.store.clear();
            for record in state.retry.iter().filter(|r| r.conversation == key) {
                let delivery = state.tracker.outbound_state(&record.local_id).cloned();
                state.store.insert(record.to_message(&inner.me), delivery);
            }
        }
        tracing::info!(conversation = %key, "conversation opened");
        inner.emit(ChatEvent::ConversationUpdated {
            key,
            unread_count: 0,
        });
        self.refresh().await
    }

    /// Leaves the active conversation.
    pub fn close_conversation(&self) {
        let inner = &self.inner;
        inner.seen.cancel();
        inner.typing.stop();
        inner.remote_typing.clear();
        let mut state = inner.state.lock();
        state.conversations.deactivate();
        state.store.clear();
    }

    /// Reloads the active conversation from history, keeping local records.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the fetch failed.
    pub async fn refresh(&self) -> Result<usize, HistoryError> {
        let inner = &self.inner;
        let Some(key) = inner.active() else {
            return Ok(0);
        };
        let query = HistoryQuery::latest(inner.chat.history_page_size);
        let history = inner.history.messages(&key, query).await?;
        let count = history.len();
        inner.seen.absorb_history(&history);
        let mut acknowledged = Vec::new();
        {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            if state.conversations.active() != Some(&key) {
                tracing::debug!(conversation = %key, "conversation switched during refresh");
                return Ok(0);
            }
            for message in &history {
                if message.sender_id == inner.me {
                    state.tracker.track_own(message.id.clone());
                    // A send whose message:sent was missed.
                    let Some(local) = message.client_id.as_ref() else {
                        continue;
                    };
                    if state.tracker.acknowledge(local, &message.id).is_ok() {
                        state.retry.complete(local);
                        acknowledged.push((local.clone(), message.clone()));
                    }
                } else {
                    state
                        .tracker
                        .track_inbound(message.id.clone(), message.is_seen());
                }
            }
            if let Some(last) = history.last() {
                state.conversations.on_message(last);
            }
            state.store.hydrate(history, &inner.me);
        }
        for (local_id, message) in acknowledged {
            tracing::debug!(local_id = %local_id, message_id = %message.id, "acknowledged from history");
            inner.complete_ack(local_id, message);
        }
        tracing::debug!(conversation = %key, count, "history loaded");
        inner.emit(ChatEvent::ConversationLoaded {
            key,
            messages: count,
        });
        Ok(count)
    }

    /// Loads the conversation list for an administrator.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError`] if the fetch failed.
    pub async fn load_conversations(&self) -> Result<Vec<Conversation>, HistoryError> {
        let list = self.inner.history.conversations(&self.inner.me).await?;
        let mut state = self.inner.state.lock();
        state.conversations.load(list);
        Ok(state.conversations.list())
    }

    /// Reports that a stored message is on screen with the given
    /// intersection ratio. Returns `true` if it was queued for seen-marking.
    pub fn observe(&self, message_id: &MessageId, ratio: f64) -> bool {
        if !self.is_visible() {
            return false;
        }
        let message = self
            .inner
            .state
            .lock()
            .store
            .get(message_id)
            .map(|entry| entry.message.clone());
        message.is_some_and(|m| self.inner.seen.observe(&m, ratio))
    }

    /// A keystroke in the composer.
    pub fn keystroke(&self) {
        if let Some(receiver) = self.inner.counterpart() {
            self.inner.typing.keystroke(&receiver);
        }
    }

    /// The composer lost focus.
    pub fn blur(&self) {
        self.inner.typing.stop();
    }

    #[must_use]
    pub fn me(&self) -> &UserId {
        &self.inner.me
    }

    #[must_use]
    pub fn active_conversation(&self) -> Option<ConversationKey> {
        self.inner.active()
    }

    /// The active conversation's records in render order.
    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.inner.state.lock().store.snapshot()
    }

    /// Records awaiting acknowledgment or retry.
    #[must_use]
    pub fn unsent(&self) -> Vec<UnsentMessage> {
        self.inner.state.lock().retry.snapshot()
    }

    #[must_use]
    pub fn delivery_state(&self, local_id: &MessageId) -> Option<DeliveryState> {
        self.inner
            .state
            .lock()
            .tracker
            .outbound_state(local_id)
            .cloned()
    }

    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        self.inner.state.lock().conversations.list()
    }

    #[must_use]
    pub fn unread(&self, key: &ConversationKey) -> u32 {
        self.inner.state.lock().conversations.unread(key)
    }

    /// Last known presence of `user`; `None` if never reported.
    #[must_use]
    pub fn presence(&self, user: &UserId) -> Option<bool> {
        self.inner.state.lock().presence.get(user)
    }

    #[must_use]
    pub fn typing(&self) -> TypingState {
        self.inner.remote_typing.state()
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.inner.typing.is_typing()
    }

    #[must_use]
    pub fn is_seen_confirmed(&self, id: &MessageId) -> bool {
        self.inner.seen.is_confirmed(id)
    }

    /// Number of `messages:mark-seen` requests sent so far.
    #[must_use]
    pub fn seen_requests(&self) -> u64 {
        self.inner.seen.requests_sent()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch_state()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }
}
