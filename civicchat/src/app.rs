//! Presentation state and command parsing for the headless client.
//!
//! [`parse_command`] turns an input line into a [`Command`]; [`App`] renders
//! stored messages and [`ChatEvent`]s into display lines according to the
//! user's [`Preferences`].

use chrono::{Local, TimeZone};
use civicchat_proto::conversation::Conversation;
use civicchat_proto::message::{Message, MessageKind, Timestamp, UserId};

use crate::chat::ChatEvent;
use crate::chat::delivery::DeliveryState;
use crate::chat::retry::UnsentMessage;
use crate::chat::store::StoredMessage;
use crate::config::{Preferences, WidgetPosition};
use crate::transport::connection::ConnectionState;

/// Column width the message view is docked within.
pub const VIEW_WIDTH: usize = 72;

/// A user action parsed from one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send to the active conversation.
    Send { content: String, kind: MessageKind },
    /// Retry the n-th unsent message (1-based, as listed by `/unsent`).
    Retry(usize),
    RetryAll,
    /// Discard the n-th unsent message.
    Remove(usize),
    /// Discard every unsent message.
    Clear,
    Unsent,
    Hide,
    Show,
    /// Open the conversation with the given peer.
    Open(String),
    Conversations,
    Reconnect,
    Help,
    Quit,
}

/// Errors from [`parse_command`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command: /{0}")]
    Unknown(String),

    #[error("/{command} needs {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },

    #[error("not a list position: {0}")]
    BadIndex(String),
}

pub const HELP: &str = "\
commands:
  <text>                 send a text message
  /image <url>           send an image link
  /file <url>            send a file link
  /location <lat,lng>    send a location
  /unsent                list unsent messages
  /retry <n>             retry unsent message n
  /retry-all             retry every failed message
  /remove <n>            discard unsent message n
  /clear                 discard every unsent message
  /open <peer>           open the conversation with a peer
  /conversations         list conversations (administrators)
  /hide, /show           simulate the page being hidden or shown
  /reconnect             connect again after giving up
  /quit";

/// Parses one input line. Blank lines yield `Ok(None)`.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands or missing arguments.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send {
            content: line.to_string(),
            kind: MessageKind::Text,
        }));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name {
        "image" => send_with(arg, MessageKind::Image, "image", "a url")?,
        "file" => send_with(arg, MessageKind::File, "file", "a url")?,
        "location" => send_with(arg, MessageKind::Location, "location", "lat,lng")?,
        "retry" => Command::Retry(index(arg, "retry")?),
        "retry-all" => Command::RetryAll,
        "remove" => Command::Remove(index(arg, "remove")?),
        "clear" => Command::Clear,
        "unsent" => Command::Unsent,
        "hide" => Command::Hide,
        "show" => Command::Show,
        "open" => {
            if arg.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "open",
                    expected: "a peer id",
                });
            }
            Command::Open(arg.to_string())
        }
        "conversations" => Command::Conversations,
        "reconnect" => Command::Reconnect,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn send_with(
    arg: &str,
    kind: MessageKind,
    command: &'static str,
    expected: &'static str,
) -> Result<Command, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument { command, expected });
    }
    Ok(Command::Send {
        content: arg.to_string(),
        kind,
    })
}

fn index(arg: &str, command: &'static str) -> Result<usize, CommandError> {
    if arg.is_empty() {
        return Err(CommandError::MissingArgument {
            command,
            expected: "a list position",
        });
    }
    match arg.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(CommandError::BadIndex(arg.to_string())),
    }
}

/// Rendered delivery status of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    /// Status for a stored record; `None` for messages from the counterpart.
    #[must_use]
    pub fn of(entry: &StoredMessage) -> Option<Self> {
        let delivery = entry.delivery.as_ref()?;
        Some(match delivery {
            DeliveryState::Queued => Self::Sending,
            DeliveryState::Sent => Self::Sent,
            DeliveryState::Acknowledged if entry.message.is_seen() => Self::Read,
            DeliveryState::Acknowledged => Self::Delivered,
            DeliveryState::Failed(_) => Self::Failed,
        })
    }

    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Sending => "\u{22ef}",
            Self::Sent => "\u{2713}",
            Self::Delivered => "\u{2713}\u{2713}",
            Self::Read => "\u{2713}\u{2713} seen",
            Self::Failed => "\u{2717}",
        }
    }
}

/// Display state for one signed-in user.
#[derive(Debug, Clone)]
pub struct App {
    me: UserId,
    preferences: Preferences,
}

impl App {
    #[must_use]
    pub const fn new(me: UserId, preferences: Preferences) -> Self {
        Self { me, preferences }
    }

    /// Formats `ts` with the configured pattern in local time, or `None`
    /// when timestamps are hidden.
    #[must_use]
    pub fn format_timestamp(&self, ts: Timestamp) -> Option<String> {
        if !self.preferences.show_timestamps {
            return None;
        }
        let ms = i64::try_from(ts.as_millis()).unwrap_or(i64::MAX);
        Some(match Local.timestamp_millis_opt(ms) {
            chrono::LocalResult::Single(dt) => {
                dt.format(&self.preferences.timestamp_format).to_string()
            }
            _ => "??:??".to_string(),
        })
    }

    fn body(message: &Message) -> String {
        match message.kind {
            MessageKind::Text => message.content.clone(),
            kind => format!("[{kind}] {}", message.content),
        }
    }

    fn sender_label<'a>(&self, message: &'a Message) -> &'a str {
        if message.sender_id == self.me {
            "You"
        } else {
            message.display_name()
        }
    }

    fn line(&self, message: &Message, status: Option<MessageStatus>) -> String {
        let mut line = String::new();
        if let Some(ts) = self.format_timestamp(message.created_at) {
            line.push_str(&format!("[{ts}] "));
        }
        line.push_str(&format!("{}: {}", self.sender_label(message), Self::body(message)));
        if let Some(status) = status {
            line.push(' ');
            line.push_str(status.symbol());
        }
        self.dock(line)
    }

    /// Places a message line on the side the widget is docked to.
    fn dock(&self, line: String) -> String {
        match self.preferences.widget_position {
            WidgetPosition::BottomLeft => line,
            WidgetPosition::BottomRight => format!("{line:>VIEW_WIDTH$}"),
        }
    }

    #[must_use]
    pub fn render_message(&self, entry: &StoredMessage) -> String {
        self.line(&entry.message, MessageStatus::of(entry))
    }

    /// Display line for a chat event, if it is worth showing.
    #[must_use]
    pub fn render_event(&self, event: &ChatEvent) -> Option<String> {
        match event {
            ChatEvent::MessageAdded(message) => {
                let status = (message.sender_id == self.me).then_some(if message.id.is_local() {
                    MessageStatus::Sending
                } else {
                    MessageStatus::Delivered
                });
                Some(self.line(message, status))
            }
            ChatEvent::MessageReplaced { .. } => None,
            ChatEvent::DeliveryChanged { message_id, state } => match state {
                DeliveryState::Failed(reason) => Some(format!(
                    "{} message {message_id} not sent: {reason} (see /unsent)",
                    MessageStatus::Failed.symbol()
                )),
                DeliveryState::Acknowledged => Some(format!(
                    "{} message delivered",
                    MessageStatus::Delivered.symbol()
                )),
                DeliveryState::Queued | DeliveryState::Sent => None,
            },
            ChatEvent::MessagesSeen(ids) => Some(format!("{} message(s) seen", ids.len())),
            ChatEvent::TypingChanged(state) => state
                .typing_user_id
                .as_ref()
                .filter(|_| state.is_typing)
                .map(|user| format!("{user} is typing\u{2026}")),
            ChatEvent::PresenceChanged { user_id, is_online } => Some(format!(
                "{user_id} is {}",
                if *is_online { "online" } else { "offline" }
            )),
            ChatEvent::ConversationUpdated { key, unread_count } => (*unread_count > 0)
                .then(|| format!("{unread_count} unread in conversation {key}")),
            ChatEvent::ConversationLoaded { key, messages } => {
                Some(format!("loaded {messages} message(s) for {key}"))
            }
            ChatEvent::ServerError(reason) => Some(format!("server error: {reason}")),
        }
    }

    #[must_use]
    pub fn render_connection(state: ConnectionState) -> String {
        match state {
            ConnectionState::Connected => "connected".to_string(),
            ConnectionState::Connecting => "connecting\u{2026}".to_string(),
            ConnectionState::Reconnecting { attempt } => {
                format!("connection lost, reconnecting (attempt {attempt})")
            }
            ConnectionState::Disconnected => "disconnected".to_string(),
        }
    }

    /// Numbered list of unsent records, matching `/retry <n>`.
    #[must_use]
    pub fn render_unsent(unsent: &[UnsentMessage]) -> Vec<String> {
        if unsent.is_empty() {
            return vec!["no unsent messages".to_string()];
        }
        unsent
            .iter()
            .enumerate()
            .map(|(i, record)| {
                let state = match (&record.error, record.is_retrying) {
                    (_, true) => "retrying".to_string(),
                    (Some(error), false) => format!("failed: {error}"),
                    (None, false) => "sending".to_string(),
                };
                format!("{:>3}. {} ({state})", i + 1, record.content)
            })
            .collect()
    }

    #[must_use]
    pub fn render_conversations(list: &[Conversation]) -> Vec<String> {
        if list.is_empty() {
            return vec!["no conversations".to_string()];
        }
        list.iter()
            .map(|c| {
                let marker = if c.is_active { "*" } else { " " };
                let last = c.last_message.as_deref().unwrap_or("");
                let unread = if c.unread_count > 0 {
                    format!(" [{}]", c.unread_count)
                } else {
                    String::new()
                };
                format!("{marker} {}{unread} {last}", c.user_id)
            })
            .collect()
    }
}
