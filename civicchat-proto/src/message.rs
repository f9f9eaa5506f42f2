//! Data model shared by the CivicChat client and relay.
//!
//! Everything here is serialized as JSON on the wire, with camelCase field
//! names, and doubles as the record format of the REST history endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed message content size in bytes (64 KB).
pub const MAX_CONTENT_SIZE: usize = 64 * 1024;

/// Prefix carried by client-generated ids until the server acknowledges them.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Username rendered when a message arrives without a usable sender profile.
pub const UNKNOWN_SENDER: &str = "Unknown user";

/// Opaque message identifier.
///
/// Server-assigned ids are stable and never reused. Client-generated ids are
/// prefixed with [`LOCAL_ID_PREFIX`] and only live until acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an existing identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh server-style identifier (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Generates a temporary client-side identifier (`local-<uuid v7>`).
    #[must_use]
    pub fn local() -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", Uuid::now_v7()))
    }

    /// Returns `true` for client-generated ids that the server has not yet
    /// replaced.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a participant (citizen or administrator).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The (user, admin) pairing a message belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationKey {
    /// The citizen side of the conversation.
    pub user_id: UserId,
    /// The administrator side of the conversation.
    pub admin_id: UserId,
}

impl ConversationKey {
    #[must_use]
    pub const fn new(user_id: UserId, admin_id: UserId) -> Self {
        Self { user_id, admin_id }
    }

    /// Returns `true` if `user` is one of the two participants.
    #[must_use]
    pub fn involves(&self, user: &UserId) -> bool {
        &self.user_id == user || &self.admin_id == user
    }

    /// Returns the participant that is not `me`, if `me` takes part at all.
    #[must_use]
    pub fn counterpart(&self, me: &UserId) -> Option<&UserId> {
        if &self.user_id == me {
            Some(&self.admin_id)
        } else if &self.admin_id == me {
            Some(&self.user_id)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.user_id, self.admin_id)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// How a message's `content` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// URL of an uploaded image.
    Image,
    /// URL of an uploaded file.
    File,
    /// A `"lat,lng"` coordinate pair.
    Location,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Location => "location",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "location" => Ok(Self::Location),
            other => Err(ValidationError::UnknownKind(other.to_string())),
        }
    }
}

/// A latitude/longitude pair carried by location messages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Parses the `"lat,lng"` content of a location message.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::BadLocation`] if the content is not two
    /// comma-separated numbers within the valid latitude/longitude ranges.
    pub fn parse(content: &str) -> Result<Self, ValidationError> {
        let bad = || ValidationError::BadLocation(content.to_string());
        let (lat, lng) = content.split_once(',').ok_or_else(bad)?;
        let lat: f64 = lat.trim().parse().map_err(|_| bad())?;
        let lng: f64 = lng.trim().parse().map_err(|_| bad())?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
            return Err(bad());
        }
        Ok(Self { lat, lng })
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Sender profile embedded in messages served by the history endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderProfile {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// A chat message as stored by the server and rendered by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    /// Local id the sender used; echoed back on self-confirmation only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<MessageId>,
    pub conversation: ConversationKey,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: Timestamp,
    #[serde(default)]
    pub seen_at: Option<Timestamp>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SenderProfile>,
}

impl Message {
    /// Returns `true` once the receiver has seen the message, using
    /// `is_read` as a fallback when no `seen_at` is recorded.
    #[must_use]
    pub const fn is_seen(&self) -> bool {
        self.seen_at.is_some() || self.is_read
    }

    /// Username to render for this message's sender.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.sender
            .as_ref()
            .map(|p| p.username.trim())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_SENDER)
    }

    /// Avatar to render for this message's sender, if any.
    #[must_use]
    pub fn avatar_url(&self) -> Option<&str> {
        self.sender
            .as_ref()
            .and_then(|p| p.avatar_url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }
}

/// Error returned when message content fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message content is empty.
    #[error("message content is empty")]
    Empty,
    /// Message content exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the content in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Location content is not a `"lat,lng"` pair.
    #[error("invalid location: {0:?}")]
    BadLocation(String),
    /// Unrecognised message kind name.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
}

/// Validates outbound content against `max` bytes and the rules of `kind`.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank content,
/// [`ValidationError::TooLarge`] above `max`, or
/// [`ValidationError::BadLocation`] for malformed location payloads.
pub fn validate_content(content: &str, kind: MessageKind, max: usize) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = content.len();
    if size > max {
        return Err(ValidationError::TooLarge { size, max });
    }
    if kind == MessageKind::Location {
        Coordinates::parse(content)?;
    }
    Ok(())
}
