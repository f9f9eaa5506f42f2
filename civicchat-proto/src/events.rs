//! Named events exchanged over the event-stream connection.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! [`ServerEvent`] flows relay → client, [`ClientEvent`] flows client → relay.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationKey, Message, MessageId, MessageKind, Timestamp, UserId};

/// Payload of `messages:seen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub message_ids: Vec<MessageId>,
    pub seen_at: Timestamp,
}

/// Payload of `typing:start` / `typing:stop` as delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingNotice {
    pub user_id: UserId,
}

/// Payload of `presence:online`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceNotice {
    pub user_id: UserId,
    pub is_online: bool,
}

/// Payload of `message:error`: the relay refused a `message:send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRejection {
    pub client_id: MessageId,
    pub reason: String,
}

/// Events pushed by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Handshake accepted for this user.
    #[serde(rename = "session:ready", rename_all = "camelCase")]
    SessionReady { user_id: UserId },
    /// A message addressed to this user.
    #[serde(rename = "message:received")]
    MessageReceived(Message),
    /// Durable acknowledgment of this user's own send, carrying `client_id`.
    #[serde(rename = "message:sent")]
    MessageSent(Message),
    /// Explicit rejection of a send.
    #[serde(rename = "message:error")]
    MessageError(SendRejection),
    #[serde(rename = "messages:seen")]
    MessagesSeen(SeenReceipt),
    #[serde(rename = "typing:start")]
    TypingStarted(TypingNotice),
    #[serde(rename = "typing:stop")]
    TypingStopped(TypingNotice),
    #[serde(rename = "presence:online")]
    Presence(PresenceNotice),
    /// Protocol-level error not tied to a message.
    #[serde(rename = "error")]
    Error { reason: String },
}

impl ServerEvent {
    /// The subscription key this event is dispatched under.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::SessionReady { .. } => EventKind::SessionReady,
            Self::MessageReceived(_) => EventKind::MessageReceived,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageError(_) => EventKind::MessageError,
            Self::MessagesSeen(_) => EventKind::MessagesSeen,
            Self::TypingStarted(_) => EventKind::TypingStart,
            Self::TypingStopped(_) => EventKind::TypingStop,
            Self::Presence(_) => EventKind::Presence,
            Self::Error { .. } => EventKind::Error,
        }
    }
}

/// Events sent by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// First frame on every connection.
    #[serde(rename = "session:auth", rename_all = "camelCase")]
    Auth { user_id: UserId, token: String },
    #[serde(rename = "message:send", rename_all = "camelCase")]
    SendMessage {
        client_id: MessageId,
        conversation: ConversationKey,
        receiver_id: UserId,
        content: String,
        kind: MessageKind,
    },
    #[serde(rename = "messages:mark-seen", rename_all = "camelCase")]
    MarkSeen { message_ids: Vec<MessageId> },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { receiver_id: UserId },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { receiver_id: UserId },
}

/// Names of the server events handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    SessionReady,
    MessageReceived,
    MessageSent,
    MessageError,
    MessagesSeen,
    TypingStart,
    TypingStop,
    Presence,
    Error,
}

impl EventKind {
    /// The wire name of the event.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionReady => "session:ready",
            Self::MessageReceived => "message:received",
            Self::MessageSent => "message:sent",
            Self::MessageError => "message:error",
            Self::MessagesSeen => "messages:seen",
            Self::TypingStart => "typing:start",
            Self::TypingStop => "typing:stop",
            Self::Presence => "presence:online",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seen_receipt_wire_shape() {
        let event = ServerEvent::MessagesSeen(SeenReceipt {
            message_ids: vec![MessageId::new("1"), MessageId::new("2")],
            seen_at: Timestamp::from_millis(10),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"event": "messages:seen", "data": {"messageIds": ["1", "2"], "seenAt": 10}})
        );
    }

    #[test]
    fn send_message_wire_shape() {
        let event = ClientEvent::SendMessage {
            client_id: MessageId::new("local-1"),
            conversation: ConversationKey::new("u".into(), "a".into()),
            receiver_id: "a".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "message:send");
        assert_eq!(value["data"]["clientId"], "local-1");
        assert_eq!(value["data"]["receiverId"], "a");
        assert_eq!(value["data"]["kind"], "text");
    }

    #[test]
    fn presence_decodes_from_wire() {
        let raw = r#"{"event":"presence:online","data":{"userId":"admin-7","isOnline":false}}"#;
        let event: ServerEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), EventKind::Presence);
        assert_eq!(
            event,
            ServerEvent::Presence(PresenceNotice {
                user_id: "admin-7".into(),
                is_online: false,
            })
        );
    }

    #[test]
    fn kind_names_match_wire_tags() {
        let event = ServerEvent::TypingStopped(TypingNotice { user_id: "a".into() });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.kind().as_str());

        let ready = ServerEvent::SessionReady { user_id: "u".into() };
        let value = serde_json::to_value(&ready).unwrap();
        assert_eq!(value["event"], EventKind::SessionReady.as_str());
        assert_eq!(value["data"]["userId"], "u");
    }
}
