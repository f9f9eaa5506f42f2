//! Typing indicators in both directions.
//!
//! [`TypingSignaler`] turns local keystrokes into at most one `typing:start`
//! per idle period and exactly one `typing:stop` when the idle timer
//! elapses or the user sends/blurs. [`RemoteTyping`] tracks the
//! counterpart's indicator and expires it if no stop arrives.

use std::sync::Arc;
use std::time::Duration;

use civicchat_proto::events::ClientEvent;
use civicchat_proto::message::UserId;
use parking_lot::Mutex;

use crate::scheduler::Scheduler;
use crate::transport::EventSink;

struct SignalerShared {
    sink: Arc<dyn EventSink>,
    idle: Duration,
    /// Receiver a `typing:start` was sent to, until the matching stop.
    active: Mutex<Option<UserId>>,
    scheduler: Scheduler<()>,
}

impl SignalerShared {
    fn emit_stop(&self) {
        let Some(receiver_id) = self.active.lock().take() else {
            return;
        };
        if let Err(e) = self.sink.publish(ClientEvent::TypingStop {
            receiver_id: receiver_id.clone(),
        }) {
            tracing::debug!(receiver = %receiver_id, error = %e, "typing:stop not sent");
        }
    }
}

/// Debounced emitter of the local user's typing state.
pub struct TypingSignaler {
    shared: Arc<SignalerShared>,
}

impl TypingSignaler {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, idle: Duration) -> Self {
        Self {
            shared: Arc::new(SignalerShared {
                sink,
                idle,
                active: Mutex::new(None),
                scheduler: Scheduler::new(),
            }),
        }
    }

    /// Registers a keystroke in a conversation with `receiver_id`.
    pub fn keystroke(&self, receiver_id: &UserId) {
        let shared = &self.shared;
        let previous = {
            let active = shared.active.lock();
            active.clone()
        };
        if previous.as_ref() != Some(receiver_id) {
            if previous.is_some() {
                shared.emit_stop();
            }
            let start = ClientEvent::TypingStart {
                receiver_id: receiver_id.clone(),
            };
            if let Err(e) = shared.sink.publish(start) {
                tracing::debug!(receiver = %receiver_id, error = %e, "typing:start not sent");
                return;
            }
            *shared.active.lock() = Some(receiver_id.clone());
        }

        let weak = Arc::downgrade(shared);
        shared.scheduler.arm((), shared.idle, move || {
            if let Some(shared) = weak.upgrade() {
                shared.emit_stop();
            }
        });
    }

    /// Ends the typing period now (send, blur, hide). No-op when idle.
    pub fn stop(&self) {
        self.shared.scheduler.cancel(&());
        self.shared.emit_stop();
    }

    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.shared.active.lock().is_some()
    }
}

/// The counterpart's typing indicator as rendered.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingState {
    pub is_typing: bool,
    pub typing_user_id: Option<UserId>,
}

type Notifier = Box<dyn Fn(&TypingState) + Send + Sync>;

struct RemoteShared {
    expiry: Duration,
    state: Mutex<TypingState>,
    scheduler: Scheduler<()>,
    notify: Option<Notifier>,
}

impl RemoteShared {
    fn set(&self, next: TypingState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != next;
            *state = next.clone();
            changed
        };
        if !changed {
            return;
        }
        if let Some(notify) = &self.notify {
            notify(&next);
        }
    }
}

/// Remote typing indicator with auto-expiry.
pub struct RemoteTyping {
    shared: Arc<RemoteShared>,
}

impl RemoteTyping {
    /// `notify` is called after every change, including expiry.
    #[must_use]
    pub fn new(expiry: Duration, notify: Option<Notifier>) -> Self {
        Self {
            shared: Arc::new(RemoteShared {
                expiry,
                state: Mutex::new(TypingState::default()),
                scheduler: Scheduler::new(),
                notify,
            }),
        }
    }

    /// Handles `typing:start` from `user`, re-arming the expiry timer.
    pub fn on_start(&self, user: &UserId) {
        self.shared.set(TypingState {
            is_typing: true,
            typing_user_id: Some(user.clone()),
        });
        let weak = Arc::downgrade(&self.shared);
        self.shared.scheduler.arm((), self.shared.expiry, move || {
            if let Some(shared) = weak.upgrade() {
                tracing::trace!("remote typing indicator expired");
                shared.set(TypingState::default());
            }
        });
    }

    /// Handles `typing:stop` from `user`. Stops from anyone else are ignored.
    pub fn on_stop(&self, user: &UserId) {
        let matches = self.shared.state.lock().typing_user_id.as_ref() == Some(user);
        if matches {
            self.clear();
        }
    }

    /// Clears the indicator (conversation switch).
    pub fn clear(&self) {
        self.shared.scheduler.cancel(&());
        self.shared.set(TypingState::default());
    }

    #[must_use]
    pub fn state(&self) -> TypingState {
        self.shared.state.lock().clone()
    }
}
