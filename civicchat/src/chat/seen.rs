//! Seen-marking: turns "this message is on screen" into batched
//! `messages:mark-seen` requests.
//!
//! A message is eligible when it was sent by the counterpart, carries no
//! `seen_at`, is not in the confirmed set, and is not part of an unconfirmed
//! batch younger than `confirm_timeout`. Eligible ids accumulate until the
//! debounce window passes without new ones, then go out as one request. A
//! batch never waits longer than [`MAX_WAIT_WINDOWS`] debounce windows from
//! its first id, so a steady scroll still flushes.
//! Confirmations (`messages:seen`) are applied through [`SeenCoordinator::confirm`]
//! only; sending a request never marks anything seen by itself.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use civicchat_proto::events::ClientEvent;
use civicchat_proto::message::{Message, MessageId, UserId};
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::SeenConfig;
use crate::scheduler::Scheduler;
use crate::transport::EventSink;

/// Upper bound on a batch's age, in debounce windows.
pub const MAX_WAIT_WINDOWS: u32 = 4;

#[derive(Debug, Default)]
struct SeenState {
    confirmed: HashSet<MessageId>,
    pending: Vec<MessageId>,
    /// When the first id of the pending batch was queued.
    batch_started: Option<Instant>,
    in_flight: HashMap<MessageId, Instant>,
    requests: u64,
}

struct SeenShared {
    viewer: UserId,
    config: SeenConfig,
    sink: Arc<dyn EventSink>,
    state: Mutex<SeenState>,
    scheduler: Scheduler<()>,
}

impl SeenShared {
    fn eligible(&self, state: &mut SeenState, message: &Message) -> bool {
        let id = &message.id;
        if message.sender_id == self.viewer
            || message.is_seen()
            || id.is_local()
            || state.confirmed.contains(id)
            || state.pending.contains(id)
        {
            return false;
        }
        match state.in_flight.get(id) {
            Some(sent) if sent.elapsed() < self.config.confirm_timeout => false,
            Some(_) => {
                tracing::debug!(message_id = %id, "seen request unconfirmed, re-queueing");
                state.in_flight.remove(id);
                true
            }
            None => true,
        }
    }

    fn flush(&self) {
        let batch = {
            let mut state = self.state.lock();
            state.batch_started = None;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return;
        }
        if !self.sink.is_connected() {
            tracing::debug!(count = batch.len(), "not connected, seen batch dropped");
            return;
        }
        match self.sink.publish(ClientEvent::MarkSeen {
            message_ids: batch.clone(),
        }) {
            Ok(()) => {
                let mut state = self.state.lock();
                let now = Instant::now();
                let timeout = self.config.confirm_timeout;
                state
                    .in_flight
                    .retain(|_, sent| now.duration_since(*sent) < timeout);
                state.requests += 1;
                for id in batch {
                    state.in_flight.insert(id, now);
                }
            }
            Err(e) => {
                tracing::warn!(count = batch.len(), error = %e, "mark-seen request failed");
            }
        }
    }
}

/// Batches and deduplicates seen-marking for one viewer.
pub struct SeenCoordinator {
    shared: Arc<SeenShared>,
}

impl SeenCoordinator {
    #[must_use]
    pub fn new(viewer: UserId, config: SeenConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            shared: Arc::new(SeenShared {
                viewer,
                config,
                sink,
                state: Mutex::new(SeenState::default()),
                scheduler: Scheduler::new(),
            }),
        }
    }

    /// Reports that `message` is on screen with the given intersection ratio.
    ///
    /// Returns `true` if the message was queued for the next batch.
    pub fn observe(&self, message: &Message, ratio: f64) -> bool {
        let shared = &self.shared;
        if ratio < shared.config.visibility_threshold {
            return false;
        }
        let debounce = shared.config.debounce;
        let delay = {
            let mut state = shared.state.lock();
            if !shared.eligible(&mut state, message) {
                return false;
            }
            state.pending.push(message.id.clone());
            let now = Instant::now();
            let started = *state.batch_started.get_or_insert(now);
            let deadline = started + debounce * MAX_WAIT_WINDOWS;
            debounce.min(deadline.saturating_duration_since(now))
        };
        let weak = Arc::downgrade(shared);
        shared.scheduler.arm((), delay, move || {
            if let Some(shared) = weak.upgrade() {
                shared.flush();
            }
        });
        true
    }

    /// Applies a `messages:seen` confirmation. Returns the ids that were not
    /// already confirmed.
    pub fn confirm(&self, ids: &[MessageId]) -> Vec<MessageId> {
        let mut state = self.shared.state.lock();
        ids.iter()
            .filter(|id| {
                state.in_flight.remove(*id);
                state.confirmed.insert((*id).clone())
            })
            .cloned()
            .collect()
    }

    /// Adds every seen record of freshly loaded history to the confirmed set.
    pub fn absorb_history(&self, messages: &[Message]) {
        let mut state = self.shared.state.lock();
        for message in messages.iter().filter(|m| m.is_seen()) {
            state.confirmed.insert(message.id.clone());
        }
    }

    /// Cancels the debounce timer and drops the pending batch. The confirmed
    /// set is kept.
    pub fn cancel(&self) {
        self.shared.scheduler.cancel(&());
        let mut state = self.shared.state.lock();
        state.pending.clear();
        state.batch_started = None;
    }

    #[must_use]
    pub fn is_confirmed(&self, id: &MessageId) -> bool {
        self.shared.state.lock().confirmed.contains(id)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Number of `messages:mark-seen` requests sent so far.
    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.shared.state.lock().requests
    }
}
