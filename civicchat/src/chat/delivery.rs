//! Delivery state machines for outgoing and incoming messages.
//!
//! Outbound: `Queued → Sent → Acknowledged`, with `Failed` reachable from
//! `Queued` (the send was never accepted) or `Sent` (explicit rejection or
//! ack timeout). A retry moves `Failed → Queued` under the same local id.
//! An acknowledgment that arrives after the message was failed is accepted,
//! since the server did persist it.
//!
//! Inbound: `Received → Seen`, once, and never for the viewer's own messages.

use std::collections::{HashMap, HashSet};

use civicchat_proto::message::MessageId;

/// Outbound lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Created locally, not yet accepted by the transport.
    Queued,
    /// Handed to the transport, awaiting `message:sent`.
    Sent,
    /// Durably stored by the server.
    Acknowledged,
    /// Not delivered; eligible for retry.
    Failed(String),
}

impl DeliveryState {
    const fn name(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Acknowledged => "acknowledged",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Inbound lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundState {
    Received,
    Seen,
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    /// The tracker has no record of this message.
    #[error("message {0} is not tracked")]
    Unknown(MessageId),

    /// The transition is not allowed from the current state.
    #[error("message {id}: cannot {action} while {from}")]
    Invalid {
        id: MessageId,
        from: &'static str,
        action: &'static str,
    },

    /// Own messages never become seen on this side.
    #[error("message {0} was sent by the viewer")]
    OwnMessage(MessageId),
}

/// Tracks per-message delivery state.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    outbound: HashMap<MessageId, DeliveryState>,
    inbound: HashMap<MessageId, InboundState>,
    /// Server ids of the viewer's own acknowledged messages.
    own: HashSet<MessageId>,
}

impl DeliveryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a new outgoing message in `Queued`.
    pub fn track_outbound(&mut self, local_id: MessageId) {
        self.outbound.insert(local_id, DeliveryState::Queued);
    }

    #[must_use]
    pub fn outbound_state(&self, local_id: &MessageId) -> Option<&DeliveryState> {
        self.outbound.get(local_id)
    }

    fn step(
        &mut self,
        id: &MessageId,
        action: &'static str,
        next: impl FnOnce(&DeliveryState) -> Option<DeliveryState>,
    ) -> Result<DeliveryState, TransitionError> {
        let current = self
            .outbound
            .get_mut(id)
            .ok_or_else(|| TransitionError::Unknown(id.clone()))?;
        let Some(state) = next(current) else {
            return Err(TransitionError::Invalid {
                id: id.clone(),
                from: current.name(),
                action,
            });
        };
        *current = state.clone();
        Ok(state)
    }

    /// `Queued → Sent`: the transport accepted the send.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] unless the message is `Queued`.
    pub fn mark_sent(&mut self, id: &MessageId) -> Result<DeliveryState, TransitionError> {
        self.step(id, "mark sent", |s| {
            matches!(s, DeliveryState::Queued).then_some(DeliveryState::Sent)
        })
    }

    /// `Sent | Failed → Acknowledged`, recording the server id.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] if the message is `Queued` or already acknowledged.
    pub fn acknowledge(
        &mut self,
        id: &MessageId,
        server_id: &MessageId,
    ) -> Result<DeliveryState, TransitionError> {
        let state = self.step(id, "acknowledge", |s| {
            matches!(s, DeliveryState::Sent | DeliveryState::Failed(_))
                .then_some(DeliveryState::Acknowledged)
        })?;
        self.own.insert(server_id.clone());
        Ok(state)
    }

    /// Records a server id as the viewer's own message (from history).
    pub fn track_own(&mut self, server_id: MessageId) {
        self.own.insert(server_id);
    }

    /// `Queued | Sent → Failed(reason)`.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] if the message is already failed or acknowledged.
    pub fn fail(&mut self, id: &MessageId, reason: &str) -> Result<DeliveryState, TransitionError> {
        self.step(id, "fail", |s| {
            matches!(s, DeliveryState::Queued | DeliveryState::Sent)
                .then(|| DeliveryState::Failed(reason.to_string()))
        })
    }

    /// `Failed → Queued` for a retry.
    ///
    /// # Errors
    ///
    /// [`TransitionError`] unless the message is `Failed`.
    pub fn requeue(&mut self, id: &MessageId) -> Result<DeliveryState, TransitionError> {
        self.step(id, "retry", |s| {
            matches!(s, DeliveryState::Failed(_)).then_some(DeliveryState::Queued)
        })
    }

    /// Stops tracking an outgoing message (user removed it).
    pub fn forget(&mut self, id: &MessageId) -> Option<DeliveryState> {
        self.outbound.remove(id)
    }

    /// Registers an incoming message. Already-seen history records start in
    /// `Seen`. Re-registering keeps the existing state.
    pub fn track_inbound(&mut self, id: MessageId, seen: bool) -> InboundState {
        let initial = if seen {
            InboundState::Seen
        } else {
            InboundState::Received
        };
        *self.inbound.entry(id).or_insert(initial)
    }

    #[must_use]
    pub fn inbound_state(&self, id: &MessageId) -> Option<InboundState> {
        self.inbound.get(id).copied()
    }

    /// `Received → Seen`.
    ///
    /// # Errors
    ///
    /// [`TransitionError::OwnMessage`] for outgoing ids,
    /// [`TransitionError::Unknown`] for untracked ids, and
    /// [`TransitionError::Invalid`] if already seen.
    pub fn mark_seen(&mut self, id: &MessageId) -> Result<InboundState, TransitionError> {
        if self.outbound.contains_key(id) || self.own.contains(id) {
            return Err(TransitionError::OwnMessage(id.clone()));
        }
        let state = self
            .inbound
            .get_mut(id)
            .ok_or_else(|| TransitionError::Unknown(id.clone()))?;
        match state {
            InboundState::Received => {
                *state = InboundState::Seen;
                Ok(InboundState::Seen)
            }
            InboundState::Seen => Err(TransitionError::Invalid {
                id: id.clone(),
                from: "seen",
                action: "mark seen",
            }),
        }
    }
}
