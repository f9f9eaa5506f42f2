//! Typed publish/subscribe registry for inbound server events.
//!
//! Handlers are keyed by [`EventKind`]; any number may be registered per
//! kind. Each registration returns a [`Subscription`] that removes the
//! handler when cancelled or dropped.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use civicchat_proto::events::{EventKind, ServerEvent};
use parking_lot::Mutex;

/// Callback invoked for every dispatched event of the subscribed kind.
pub type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

/// The handler registry.
#[derive(Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for events of `kind`.
    #[must_use = "the handler is removed when the subscription is dropped"]
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.handlers.entry(kind).or_default().push((id, handler));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Invokes every handler subscribed to the event's kind.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// cancel subscriptions themselves.
    pub fn dispatch(&self, event: &ServerEvent) {
        let handlers: Vec<Handler> = self
            .registry
            .lock()
            .handlers
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::trace!(event = %event.kind(), "no handlers for event");
        }
        for handler in handlers {
            handler(event);
        }
    }

    /// Total number of live handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.registry.lock().handlers.values().map(Vec::len).sum()
    }
}

/// Revocable handle for one registered handler.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the handler now.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock();
        if let Some(list) = registry.handlers.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                registry.handlers.remove(&self.kind);
            }
        }
    }
}
