//! The single event-stream connection owned by a chat client.
//!
//! [`Connection`] is constructed explicitly around a [`Connector`] and has a
//! `connect()` / `disconnect()` lifecycle. While connected, a supervisor task
//! drains the link and dispatches every inbound event through the
//! [`EventBus`]. When the link drops, the supervisor re-dials with capped
//! exponential backoff; subscribers keep their registrations and only observe
//! the [`ConnectionState`] flip.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use civicchat_proto::events::{ClientEvent, EventKind, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::bus::{EventBus, Handler, Subscription};
use super::{ConnectionError, Connector, Credentials, EventSink, Link, TransportError};
use crate::config::{ConnectionConfig, ReconnectConfig};

/// Connectivity as last observed by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// An explicit `connect()` is dialing.
    Connecting,
    Connected,
    /// The link dropped and the supervisor is re-dialing.
    Reconnecting {
        attempt: u32,
    },
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("offline"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("online"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// Capped exponential delay sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    multiplier: f64,
    remaining: Option<u32>,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            next: config.initial_delay.min(config.max_delay),
            max: config.max_delay,
            multiplier: config.multiplier.max(1.0),
            remaining: config.max_attempts,
        }
    }

    /// The delay before the next attempt, or `None` once attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let delay = self.next;
        self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max)
            .min(self.max);
        Some(delay)
    }
}

struct Shared<C> {
    connector: C,
    credentials: Credentials,
    config: ConnectionConfig,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    /// Serializes dialing between `connect()` and the supervisor.
    dial_lock: tokio::sync::Mutex<()>,
    stopped: AtomicBool,
}

impl<C: Connector> Shared<C> {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    async fn dial_once(&self) -> Result<Link, ConnectionError> {
        tokio::time::timeout(
            self.config.connect_timeout,
            self.connector
                .dial(&self.credentials, self.config.channel_capacity),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)?
    }

    /// Makes `link` the live link and returns its inbound half.
    fn attach(&self, link: Link) -> mpsc::Receiver<ServerEvent> {
        *self.outbound.lock() = Some(link.tx);
        self.set_state(ConnectionState::Connected);
        link.rx
    }
}

impl<C> Drop for Shared<C> {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().take() {
            handle.abort();
        }
    }
}

/// Handle to the connection; clones share the same link.
pub struct Connection<C> {
    shared: Arc<Shared<C>>,
}

impl<C> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.shared.credentials.user_id)
            .field("state", &*self.shared.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Connection<C> {
    /// Creates a disconnected connection. Nothing is dialed until
    /// [`connect`](Self::connect).
    #[must_use]
    pub fn new(connector: C, credentials: Credentials, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                connector,
                credentials,
                config,
                bus: EventBus::new(),
                state,
                outbound: Mutex::new(None),
                supervisor: Mutex::new(None),
                dial_lock: tokio::sync::Mutex::new(()),
                stopped: AtomicBool::new(true),
            }),
        }
    }

    /// Establishes the link, returning immediately if it is already up.
    ///
    /// Makes up to `connect_attempts` dials, each bounded by
    /// `connect_timeout` and spaced by the reconnect backoff.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Exhausted`] wrapping the last failure when
    /// every attempt fails.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let shared = &self.shared;
        let _guard = shared.dial_lock.lock().await;
        if shared.is_connected() {
            return Ok(());
        }

        shared.stopped.store(false, Ordering::SeqCst);
        if let Some(stale) = shared.supervisor.lock().take() {
            stale.abort();
        }
        shared.set_state(ConnectionState::Connecting);

        let attempts = shared.config.connect_attempts.max(1);
        let mut backoff = Backoff::new(&shared.config.reconnect);
        let mut last = ConnectionError::Closed;
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = backoff.next_delay().unwrap_or(shared.config.reconnect.max_delay);
                tokio::time::sleep(delay).await;
            }
            match shared.dial_once().await {
                Ok(link) => {
                    let rx = shared.attach(link);
                    let handle = tokio::spawn(supervise(Arc::downgrade(shared), rx));
                    *shared.supervisor.lock() = Some(handle);
                    tracing::info!(
                        user_id = %shared.credentials.user_id,
                        attempt,
                        "connected to event hub"
                    );
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "connect attempt failed");
                    last = e;
                }
            }
        }

        shared.set_state(ConnectionState::Disconnected);
        Err(ConnectionError::Exhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Closes the link and stops reconnecting.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        shared.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = shared.supervisor.lock().take() {
            handle.abort();
        }
        shared.outbound.lock().take();
        shared.set_state(ConnectionState::Disconnected);
        tracing::info!("disconnected from event hub");
    }

    /// Registers `handler` for inbound events of `kind`.
    #[must_use = "the handler is removed when the subscription is dropped"]
    pub fn subscribe(&self, kind: EventKind, handler: Handler) -> Subscription {
        self.shared.bus.subscribe(kind, handler)
    }

    /// The handler registry inbound events are dispatched through.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// A receiver that observes every [`ConnectionState`] change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.shared.credentials
    }
}

impl<C: Connector> EventSink for Connection<C> {
    fn publish(&self, event: ClientEvent) -> Result<(), TransportError> {
        if !self.shared.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let outbound = self.shared.outbound.lock();
        let Some(tx) = outbound.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Busy,
            TrySendError::Closed(_) => TransportError::NotConnected,
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

/// Drains the live link and re-dials when it drops.
///
/// Holds only a weak reference between events so that dropping every
/// [`Connection`] handle tears the task down.
async fn supervise<C: Connector>(weak: Weak<Shared<C>>, mut rx: mpsc::Receiver<ServerEvent>) {
    loop {
        while let Some(event) = rx.recv().await {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.bus.dispatch(&event);
        }

        {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            shared.outbound.lock().take();
            if shared.stopped.load(Ordering::SeqCst) {
                shared.set_state(ConnectionState::Disconnected);
                return;
            }
            tracing::warn!("event hub link lost, reconnecting");
        }

        match reconnect(&weak).await {
            Some(next) => rx = next,
            None => return,
        }
    }
}

async fn reconnect<C: Connector>(weak: &Weak<Shared<C>>) -> Option<mpsc::Receiver<ServerEvent>> {
    let mut backoff = Backoff::new(&weak.upgrade()?.config.reconnect);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let delay = {
            let shared = weak.upgrade()?;
            let Some(delay) = backoff.next_delay() else {
                tracing::warn!(attempts = attempt - 1, "giving up on reconnect");
                shared.set_state(ConnectionState::Disconnected);
                return None;
            };
            shared.set_state(ConnectionState::Reconnecting { attempt });
            delay
        };
        tokio::time::sleep(delay).await;

        let shared = weak.upgrade()?;
        let _guard = shared.dial_lock.lock().await;
        if shared.stopped.load(Ordering::SeqCst) {
            return None;
        }
        match shared.dial_once().await {
            Ok(link) => {
                tracing::info!(attempt, "reconnected to event hub");
                return Some(shared.attach(link));
            }
            Err(e) => {
                tracing::warn!(attempt, delay_ms = delay.as_millis(), error = %e, "reconnect attempt failed");
            }
        }
    }
}
