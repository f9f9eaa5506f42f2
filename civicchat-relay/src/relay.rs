//! Relay server core: shared state, WebSocket event hub, session registry,
//! and the REST history endpoints.
//!
//! Clients open `/ws`, authenticate with `session:auth`, and from then on
//! exchange JSON events. Sends are validated, stored in the
//! [`MessageStore`], echoed to the sender as `message:sent` and pushed to
//! the receiver as `message:received`. History pages and the
//! administrator's conversation list are served over plain HTTP.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use civicchat_proto::codec;
use civicchat_proto::conversation::Conversation;
use civicchat_proto::events::{
    ClientEvent, PresenceNotice, SeenReceipt, SendRejection, ServerEvent, TypingNotice,
};
use civicchat_proto::message::{
    self as proto, ConversationKey, MAX_CONTENT_SIZE, Timestamp, UserId,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use crate::config::RelayConfig;
use crate::store::{DEFAULT_HISTORY_LIMIT, MessageStore, NewMessage};

type Outbox = mpsc::UnboundedSender<Message>;

/// Shared relay state: live sessions per user and the message store.
pub struct RelayState {
    /// User id to that user's open sessions, keyed by session number.
    sessions: RwLock<HashMap<UserId, HashMap<u64, Outbox>>>,
    next_session: AtomicU64,
    pub store: MessageStore,
    max_content_size: usize,
    history_limit: u32,
    /// Token clients must present. `None` accepts any non-empty token.
    auth_token: Option<String>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates a relay state with default limits and no auth token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            store: MessageStore::new(),
            max_content_size: MAX_CONTENT_SIZE,
            history_limit: DEFAULT_HISTORY_LIMIT,
            auth_token: None,
        }
    }

    /// Creates a relay state from the resolved configuration.
    #[must_use]
    pub fn with_config(config: &RelayConfig) -> Self {
        Self {
            max_content_size: config.max_content_size,
            history_limit: config.history_limit,
            auth_token: config.auth_token.clone(),
            ..Self::new()
        }
    }

    /// Registers a session. Returns `true` if it is the user's first one.
    pub async fn register(&self, user_id: &UserId, session: u64, sender: Outbox) -> bool {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.entry(user_id.clone()).or_default();
        entry.insert(session, sender);
        entry.len() == 1
    }

    /// Removes a session. Returns `true` if it was the user's last one.
    pub async fn unregister(&self, user_id: &UserId, session: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(user_id) else {
            return false;
        };
        if entry.remove(&session).is_none() {
            return false;
        }
        if entry.is_empty() {
            sessions.remove(user_id);
            true
        } else {
            false
        }
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.sessions.read().await.contains_key(user_id)
    }

    /// Users with at least one open session.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Queues `event` on every session of `user_id`. Returns how many
    /// sessions it reached.
    pub async fn send_to(&self, user_id: &UserId, event: &ServerEvent) -> usize {
        let frame = match codec::encode_server(event) {
            Ok(text) => Message::Text(text.into()),
            Err(e) => {
                tracing::error!(error = %e, event = %event.kind(), "failed to encode event");
                return 0;
            }
        };
        let sessions = self.sessions.read().await;
        sessions.get(user_id).map_or(0, |entry| {
            entry
                .values()
                .filter(|tx| tx.send(frame.clone()).is_ok())
                .count()
        })
    }

    async fn broadcast_except(&self, except: &UserId, event: &ServerEvent) {
        for user in self.online_users().await {
            if &user != except {
                self.send_to(&user, event).await;
            }
        }
    }

    fn accepts(&self, token: &str) -> bool {
        match &self.auth_token {
            Some(expected) => token == expected,
            None => !token.is_empty(),
        }
    }

    /// Checks an HTTP `Authorization: Bearer` header against the token.
    fn check_bearer(&self, headers: &HeaderMap) -> Result<(), StatusCode> {
        let Some(expected) = &self.auth_token else {
            return Ok(());
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if presented == Some(expected.as_str()) {
            Ok(())
        } else {
            Err(StatusCode::UNAUTHORIZED)
        }
    }

    /// Send a WebSocket Close frame to every open session.
    pub async fn close_all_connections(&self) {
        let sessions = self.sessions.read().await;
        for (user_id, entry) in sessions.iter() {
            tracing::info!(user_id = %user_id, sessions = entry.len(), "sending close frame");
            for sender in entry.values() {
                let _ = sender.send(Message::Close(None));
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for one session.
///
/// The connection lifecycle:
/// 1. Wait for `session:auth` and check the token.
/// 2. Register the session and reply `session:ready`.
/// 3. Tell the newcomer who is online, and everyone else that the user came
///    online if this is their first session.
/// 4. Route events until either side closes.
/// 5. Unregister, announcing the user offline after their last session.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match wait_for_auth(&mut ws_receiver, &state).await {
        Ok(user_id) => user_id,
        Err(reason) => {
            tracing::warn!(reason = %reason, "session rejected");
            let _ = send_event(&mut ws_sender, &ServerEvent::Error { reason }).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let session = state.next_session.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let first = state.register(&user_id, session, tx).await;

    let ready = ServerEvent::SessionReady {
        user_id: user_id.clone(),
    };
    if let Err(e) = send_event(&mut ws_sender, &ready).await {
        tracing::error!(user_id = %user_id, error = %e, "failed to send session:ready");
        state.unregister(&user_id, session).await;
        return;
    }
    tracing::info!(user_id = %user_id, session, "session ready");

    for other in state.online_users().await {
        if other == user_id {
            continue;
        }
        let notice = ServerEvent::Presence(PresenceNotice {
            user_id: other,
            is_online: true,
        });
        if send_event(&mut ws_sender, &notice).await.is_err() {
            break;
        }
    }
    if first {
        let online = ServerEvent::Presence(PresenceNotice {
            user_id: user_id.clone(),
            is_online: true,
        });
        state.broadcast_except(&user_id, &online).await;
    }

    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user_id = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => match codec::decode_client(text.as_str()) {
                    Ok(event) => handle_client_event(&reader_user, event, &reader_state).await,
                    Err(e) => {
                        tracing::warn!(user_id = %reader_user, error = %e, "failed to decode event");
                    }
                },
                Message::Close(_) => {
                    tracing::info!(user_id = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.unregister(&user_id, session).await {
        let offline = ServerEvent::Presence(PresenceNotice {
            user_id: user_id.clone(),
            is_online: false,
        });
        state.broadcast_except(&user_id, &offline).await;
    }
    tracing::info!(user_id = %user_id, session, "session closed");
}

/// Waits for the `session:auth` frame and returns the authenticated user.
async fn wait_for_auth(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &RelayState,
) -> Result<UserId, String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                return match codec::decode_client(text.as_str()) {
                    Ok(ClientEvent::Auth { user_id, token }) => {
                        if user_id.as_str().is_empty() {
                            Err("empty user id".to_string())
                        } else if !state.accepts(&token) {
                            Err("invalid token".to_string())
                        } else {
                            Ok(user_id)
                        }
                    }
                    Ok(_) => Err("expected session:auth".to_string()),
                    Err(e) => Err(format!("malformed handshake: {e}")),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err("connection closed before session:auth".to_string())
}

/// Handles one event from an authenticated session.
async fn handle_client_event(user_id: &UserId, event: ClientEvent, state: &RelayState) {
    match event {
        ClientEvent::SendMessage {
            client_id,
            conversation,
            receiver_id,
            content,
            kind,
        } => {
            route_message(
                state,
                NewMessage {
                    client_id,
                    conversation,
                    sender_id: user_id.clone(),
                    receiver_id,
                    content,
                    kind,
                },
            )
            .await;
        }
        ClientEvent::MarkSeen { message_ids } => {
            let at = Timestamp::now();
            let update = state.store.mark_seen(user_id, &message_ids, at).await;
            tracing::debug!(
                user_id = %user_id,
                requested = message_ids.len(),
                confirmed = update.confirmed.len(),
                "mark seen"
            );
            if !update.confirmed.is_empty() {
                let receipt = ServerEvent::MessagesSeen(SeenReceipt {
                    message_ids: update.confirmed,
                    seen_at: at,
                });
                state.send_to(user_id, &receipt).await;
            }
            for (sender, ids) in update.newly_seen {
                if &sender == user_id {
                    continue;
                }
                let receipt = ServerEvent::MessagesSeen(SeenReceipt {
                    message_ids: ids,
                    seen_at: at,
                });
                state.send_to(&sender, &receipt).await;
            }
        }
        ClientEvent::TypingStart { receiver_id } => {
            let notice = ServerEvent::TypingStarted(TypingNotice {
                user_id: user_id.clone(),
            });
            state.send_to(&receiver_id, &notice).await;
        }
        ClientEvent::TypingStop { receiver_id } => {
            let notice = ServerEvent::TypingStopped(TypingNotice {
                user_id: user_id.clone(),
            });
            state.send_to(&receiver_id, &notice).await;
        }
        ClientEvent::Auth { .. } => {
            tracing::warn!(user_id = %user_id, "received duplicate session:auth");
        }
    }
}

/// Validates, stores and delivers one send.
async fn route_message(state: &RelayState, new: NewMessage) {
    let sender_id = new.sender_id.clone();
    if let Err(reason) = check_send(state, &new) {
        tracing::warn!(
            user_id = %sender_id,
            client_id = %new.client_id,
            reason = %reason,
            "send rejected"
        );
        let rejection = ServerEvent::MessageError(SendRejection {
            client_id: new.client_id,
            reason,
        });
        state.send_to(&sender_id, &rejection).await;
        return;
    }

    let appended = state.store.append(new).await;
    let message = appended.message;
    tracing::debug!(
        from = %message.sender_id,
        to = %message.receiver_id,
        id = %message.id,
        duplicate = appended.duplicate,
        "routing message"
    );

    state
        .send_to(&sender_id, &ServerEvent::MessageSent(message.clone()))
        .await;
    if !appended.duplicate {
        let receiver_id = message.receiver_id.clone();
        let mut inbound = message;
        inbound.client_id = None;
        let reached = state
            .send_to(&receiver_id, &ServerEvent::MessageReceived(inbound))
            .await;
        if reached == 0 {
            tracing::debug!(to = %receiver_id, "receiver offline, message kept for history");
        }
    }
}

fn check_send(state: &RelayState, new: &NewMessage) -> Result<(), String> {
    proto::validate_content(&new.content, new.kind, state.max_content_size)
        .map_err(|e| e.to_string())?;
    if new.conversation.counterpart(&new.sender_id) != Some(&new.receiver_id) {
        return Err("receiver is not the other participant of the conversation".to_string());
    }
    Ok(())
}

/// Encodes and sends an event directly on a WebSocket sender.
async fn send_event(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), String> {
    let text = codec::encode_server(event).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Query string of the history endpoint.
#[derive(Debug, Default, serde::Deserialize)]
pub struct PageParams {
    pub limit: Option<u32>,
    /// Only messages created strictly before this instant (epoch millis).
    pub before: Option<u64>,
}

/// `GET /conversations/{user_id}/{admin_id}/messages`
async fn messages_handler(
    State(state): State<Arc<RelayState>>,
    Path((user_id, admin_id)): Path<(String, String)>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<Vec<proto::Message>>, StatusCode> {
    state.check_bearer(&headers)?;
    let key = ConversationKey::new(UserId::new(user_id), UserId::new(admin_id));
    let limit = params
        .limit
        .unwrap_or(state.history_limit)
        .min(state.history_limit);
    let before = params.before.map(Timestamp::from_millis);
    Ok(Json(state.store.page(&key, limit, before).await))
}

/// `GET /admins/{admin_id}/conversations`
async fn conversations_handler(
    State(state): State<Arc<RelayState>>,
    Path(admin_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    state.check_bearer(&headers)?;
    Ok(Json(state.store.conversations(&UserId::new(admin_id)).await))
}

/// Builds the relay's router: the event hub plus the history endpoints.
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/conversations/{user_id}/{admin_id}/messages",
            axum::routing::get(messages_handler),
        )
        .route(
            "/admins/{admin_id}/conversations",
            axum::routing::get(conversations_handler),
        )
        .with_state(state)
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
