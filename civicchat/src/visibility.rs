//! Pauses and resumes event handling with host visibility.
//!
//! The gate remembers every handler registration. While visible, each one
//! holds a live [`Subscription`]; hiding drops them all (the connection
//! itself stays open) and showing re-subscribes exactly once.

use civicchat_proto::events::EventKind;

use crate::transport::bus::{EventBus, Handler, Subscription};

#[derive(Default)]
pub struct VisibilityGate {
    registrations: Vec<(EventKind, Handler)>,
    live: Option<Vec<Subscription>>,
}

impl std::fmt::Debug for VisibilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityGate")
            .field("registrations", &self.registrations.len())
            .field("visible", &self.is_visible())
            .finish()
    }
}

impl VisibilityGate {
    /// A hidden gate with no registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler; it is subscribed immediately if the gate is visible.
    pub fn register(&mut self, bus: &EventBus, kind: EventKind, handler: Handler) {
        if let Some(live) = self.live.as_mut() {
            live.push(bus.subscribe(kind, handler.clone()));
        }
        self.registrations.push((kind, handler));
    }

    /// Subscribes every registration. Returns `false` if already visible.
    pub fn show(&mut self, bus: &EventBus) -> bool {
        if self.live.is_some() {
            return false;
        }
        let subs = self
            .registrations
            .iter()
            .map(|(kind, handler)| bus.subscribe(*kind, handler.clone()))
            .collect();
        self.live = Some(subs);
        tracing::debug!(handlers = self.registrations.len(), "event handlers resumed");
        true
    }

    /// Revokes every live subscription. Returns `false` if already hidden.
    pub fn hide(&mut self) -> bool {
        let Some(subs) = self.live.take() else {
            return false;
        };
        tracing::debug!(handlers = subs.len(), "event handlers paused");
        drop(subs);
        true
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.live.is_some()
    }
}
