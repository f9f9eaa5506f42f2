//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a network
//! connection. [`pair`] returns a [`LoopbackConnector`] to hand to a
//! [`super::connection::Connection`] and a [`LoopbackServer`] that plays the
//! event hub: it observes what the client sends, pushes server events, and
//! can go offline or cut the live link to exercise reconnects.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use civicchat_proto::events::{ClientEvent, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ConnectionError, Connector, Credentials, Link};

/// Capacity of the server → client direction.
const SERVER_BUFFER: usize = 256;

struct ServerSide {
    to_client: mpsc::Sender<ServerEvent>,
    pump: JoinHandle<()>,
}

struct Hub {
    online: AtomicBool,
    dials: AtomicU32,
    rejection: Mutex<Option<String>>,
    last_credentials: Mutex<Option<Credentials>>,
    link: Mutex<Option<ServerSide>>,
    inbox_tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Hub {
    fn cut(&self) -> bool {
        self.link.lock().take().is_some_and(|side| {
            side.pump.abort();
            true
        })
    }
}

/// Client half: dials the in-process hub.
#[derive(Clone)]
pub struct LoopbackConnector {
    hub: Arc<Hub>,
}

/// Server half: drives the in-process hub from a test.
pub struct LoopbackServer {
    hub: Arc<Hub>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
}

/// Create a connected connector/server pair. The server starts online.
#[must_use]
pub fn pair() -> (LoopbackConnector, LoopbackServer) {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let hub = Arc::new(Hub {
        online: AtomicBool::new(true),
        dials: AtomicU32::new(0),
        rejection: Mutex::new(None),
        last_credentials: Mutex::new(None),
        link: Mutex::new(None),
        inbox_tx,
    });
    (
        LoopbackConnector {
            hub: Arc::clone(&hub),
        },
        LoopbackServer {
            hub,
            inbox: tokio::sync::Mutex::new(inbox_rx),
        },
    )
}

impl Connector for LoopbackConnector {
    async fn dial(&self, credentials: &Credentials, capacity: usize) -> Result<Link, ConnectionError> {
        let hub = &self.hub;
        hub.dials.fetch_add(1, Ordering::SeqCst);
        if !hub.online.load(Ordering::SeqCst) {
            return Err(ConnectionError::Unreachable("loopback hub offline".into()));
        }
        if let Some(reason) = hub.rejection.lock().clone() {
            return Err(ConnectionError::Rejected(reason));
        }
        *hub.last_credentials.lock() = Some(credentials.clone());

        let (client_tx, mut client_rx) = mpsc::channel::<ClientEvent>(capacity.max(1));
        let (server_tx, server_rx) = mpsc::channel::<ServerEvent>(SERVER_BUFFER);
        let inbox = hub.inbox_tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = client_rx.recv().await {
                if inbox.send(event).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = hub.link.lock().replace(ServerSide {
            to_client: server_tx,
            pump,
        }) {
            previous.pump.abort();
        }

        Ok(Link {
            tx: client_tx,
            rx: server_rx,
        })
    }
}

impl LoopbackServer {
    /// Push an event to the live link. Returns `false` if there is none.
    pub fn push(&self, event: ServerEvent) -> bool {
        let link = self.hub.link.lock();
        link.as_ref()
            .is_some_and(|side| side.to_client.try_send(event).is_ok())
    }

    /// Next event the client sent, in order, across links.
    pub async fn next_event(&self) -> Option<ClientEvent> {
        self.inbox.lock().await.recv().await
    }

    /// Everything the client has sent that has not been read yet.
    pub async fn drain(&self) -> Vec<ClientEvent> {
        let mut inbox = self.inbox.lock().await;
        let mut events = Vec::new();
        while let Ok(event) = inbox.try_recv() {
            events.push(event);
        }
        events
    }

    /// Cuts the live link from the server side. Returns `false` if there was
    /// none.
    pub fn drop_link(&self) -> bool {
        self.hub.cut()
    }

    /// While offline, every dial fails with `Unreachable`.
    pub fn set_online(&self, online: bool) {
        self.hub.online.store(online, Ordering::SeqCst);
    }

    /// Make subsequent handshakes fail with `reason`, or succeed again.
    pub fn reject_with(&self, reason: Option<&str>) {
        *self.hub.rejection.lock() = reason.map(str::to_string);
    }

    #[must_use]
    pub fn dial_count(&self) -> u32 {
        self.hub.dials.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.hub.link.lock().is_some()
    }

    /// Credentials presented by the most recent successful dial.
    #[must_use]
    pub fn last_credentials(&self) -> Option<Credentials> {
        self.hub.last_credentials.lock().clone()
    }
}
