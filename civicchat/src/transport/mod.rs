//! Transport layer for the CivicChat client.
//!
//! A [`Connector`] produces a [`Link`]: a pair of channels carrying typed
//! events to and from the event hub, available once the handshake is done.
//! The [`connection::Connection`] owns at most one live link, re-dials it with
//! backoff when it drops, and dispatches inbound events through the
//! [`bus::EventBus`]. Implementations:
//! - [`ws::WsConnector`]: WebSocket with JSON text frames
//! - [`loopback::LoopbackConnector`]: in-process channels for testing

pub mod bus;
pub mod connection;
pub mod loopback;
pub mod ws;

use std::future::Future;

use civicchat_proto::events::{ClientEvent, ServerEvent};
use civicchat_proto::message::UserId;
use tokio::sync::mpsc;

/// Errors returned by [`EventSink::publish`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No live link; the event was not sent.
    #[error("not connected")]
    NotConnected,

    /// The outbound channel is full.
    #[error("outbound channel is full")]
    Busy,
}

/// Errors from establishing a link.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The server URL could not be used.
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Dial plus handshake did not finish in time.
    #[error("connect timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server refused the session.
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// The stream ended before the handshake completed.
    #[error("connection closed during handshake")]
    Closed,

    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<ConnectionError>,
    },
}

/// Identity presented in the `session:auth` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: UserId,
    pub token: String,
}

/// A live, authenticated link to the event hub.
///
/// Dropping `tx` closes the link; `rx` yields `None` once the server side
/// is gone.
#[derive(Debug)]
pub struct Link {
    pub tx: mpsc::Sender<ClientEvent>,
    pub rx: mpsc::Receiver<ServerEvent>,
}

/// Dials the event hub and performs the handshake.
pub trait Connector: Send + Sync + 'static {
    /// Open a new link authenticated as `credentials`.
    ///
    /// `capacity` bounds the outbound channel of the returned link.
    fn dial(
        &self,
        credentials: &Credentials,
        capacity: usize,
    ) -> impl Future<Output = Result<Link, ConnectionError>> + Send;
}

/// Fire-and-forget outbound path shared by the chat components.
pub trait EventSink: Send + Sync {
    /// Hand `event` to the live link.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotConnected`] when there is no live link and
    /// [`TransportError::Busy`] when the outbound channel is full. Nothing is
    /// buffered or retried in either case.
    fn publish(&self, event: ClientEvent) -> Result<(), TransportError>;

    /// Last-known connectivity.
    fn is_connected(&self) -> bool;
}
