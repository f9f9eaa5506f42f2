//! WebSocket connector.
//!
//! Dials the event hub with tokio-tungstenite, performs the
//! `session:auth` → `session:ready` handshake, and then bridges the socket to
//! a [`Link`] with a single background task. Frames are JSON text; anything
//! that does not decode is logged and skipped.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use civicchat_proto::codec;
use civicchat_proto::events::{ClientEvent, ServerEvent};

use super::{ConnectionError, Connector, Credentials, Link};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Capacity of the inbound (server → client) channel.
const INBOUND_BUFFER: usize = 256;

/// Timeout for the `session:ready` reply once the socket is open.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector for `ws://` and `wss://` event hub URLs.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidUrl`] if `url` does not parse or is
    /// not a WebSocket URL.
    pub fn new(url: &str) -> Result<Self, ConnectionError> {
        let parsed = Url::parse(url).map_err(|e| ConnectionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }
        Ok(Self { url: parsed })
    }

    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn dial(&self, credentials: &Credentials, capacity: usize) -> Result<Link, ConnectionError> {
        let (mut ws, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            tracing::warn!(url = %self.url, err = %e, "event hub WebSocket connect failed");
            ConnectionError::Unreachable(e.to_string())
        })?;

        let auth = ClientEvent::Auth {
            user_id: credentials.user_id.clone(),
            token: credentials.token.clone(),
        };
        let frame = codec::encode_client(&auth).map_err(|e| ConnectionError::Rejected(e.to_string()))?;
        ws.send(WsMessage::text(frame))
            .await
            .map_err(|e| ConnectionError::Unreachable(format!("failed to send auth: {e}")))?;

        tokio::time::timeout(HANDSHAKE_TIMEOUT, await_ready(&mut ws))
            .await
            .map_err(|_| {
                tracing::warn!(url = %self.url, "session:ready timed out");
                ConnectionError::Timeout
            })??;
        tracing::debug!(user_id = %credentials.user_id, "session ready");

        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
        tokio::spawn(bridge(ws, out_rx, in_tx));

        Ok(Link {
            tx: out_tx,
            rx: in_rx,
        })
    }
}

/// Reads frames until the handshake reply arrives.
async fn await_ready(ws: &mut WsStream) -> Result<(), ConnectionError> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match codec::decode_server(text.as_str()) {
                Ok(ServerEvent::SessionReady { .. }) => return Ok(()),
                Ok(ServerEvent::Error { reason }) => {
                    tracing::warn!(reason = %reason, "event hub rejected session");
                    return Err(ConnectionError::Rejected(reason));
                }
                Ok(other) => {
                    tracing::debug!(event = %other.kind(), "event before session:ready, skipping");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed handshake frame, skipping");
                }
            },
            Ok(WsMessage::Close(_)) => return Err(ConnectionError::Closed),
            Ok(_) => {}
            Err(e) => return Err(ConnectionError::Unreachable(e.to_string())),
        }
    }
    Err(ConnectionError::Closed)
}

/// Moves events between the socket and the link channels until either side
/// goes away.
async fn bridge(
    ws: WsStream,
    mut out_rx: mpsc::Receiver<ClientEvent>,
    in_tx: mpsc::Sender<ServerEvent>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                let Some(event) = outbound else {
                    // Connection dropped its sender: close politely.
                    let _ = sink.close().await;
                    break;
                };
                let frame = match codec::encode_client(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(err = %e, "failed to encode outbound event, dropping");
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::text(frame)).await {
                    tracing::warn!(err = %e, "event hub send failed");
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => match codec::decode_server(text.as_str()) {
                        Ok(event) => {
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(err = %e, "malformed event frame, skipping");
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!("event hub closed the WebSocket");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ignore ping/pong/binary frames.
                    }
                    Some(Err(e)) => {
                        tracing::warn!(err = %e, "event hub WebSocket read error");
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!("event hub bridge exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(WsConnector::new("ws://127.0.0.1:9000/ws").is_ok());
        assert!(WsConnector::new("wss://chat.example.org/ws").is_ok());
        assert!(matches!(
            WsConnector::new("http://127.0.0.1:9000/ws"),
            Err(ConnectionError::InvalidUrl { .. })
        ));
        assert!(matches!(
            WsConnector::new("not a url"),
            Err(ConnectionError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_reported() {
        let connector = WsConnector::new("ws://127.0.0.1:1/ws").unwrap();
        let creds = Credentials {
            user_id: "u".into(),
            token: String::new(),
        };
        assert!(matches!(
            connector.dial(&creds, 8).await,
            Err(ConnectionError::Unreachable(_))
        ));
    }
}
