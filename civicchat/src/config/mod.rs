//! Configuration system for the CivicChat client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/civicchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use civicchat_proto::message::{ConversationKey, MAX_CONTENT_SIZE, UserId};
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value is present but unusable.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
    chat: ChatFileConfig,
    seen: SeenFileConfig,
    typing: TypingFileConfig,
    preferences: PreferencesFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    history_url: Option<String>,
    user_id: Option<String>,
    token: Option<String>,
    peer_id: Option<String>,
    role: Option<Role>,
    connect_timeout_secs: Option<u64>,
    connect_attempts: Option<u32>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    max_attempts: Option<u32>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    ack_timeout_secs: Option<u64>,
    max_content_size: Option<usize>,
    history_page_size: Option<u32>,
    event_buffer: Option<usize>,
}

/// `[seen]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeenFileConfig {
    debounce_ms: Option<u64>,
    visibility_threshold: Option<f64>,
    confirm_timeout_secs: Option<u64>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    idle_ms: Option<u64>,
    remote_expiry_ms: Option<u64>,
}

/// `[preferences]` section of the config file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PreferencesFileConfig {
    show_timestamps: Option<bool>,
    widget_position: Option<WidgetPosition>,
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Which side of a conversation this client speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A citizen reporting issues.
    #[default]
    User,
    /// An administrator answering citizens.
    Admin,
}

/// Where the chat widget is docked in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WidgetPosition {
    #[default]
    BottomRight,
    BottomLeft,
}

/// Reconnect backoff policy for the transport connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt.
    pub multiplier: f64,
    /// Give up after this many consecutive failures (`None` retries forever).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Transport connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Bound on a single dial + handshake.
    pub connect_timeout: Duration,
    /// Dial attempts made by an explicit `connect()` before giving up.
    pub connect_attempts: u32,
    /// Capacity of the outbound event channel.
    pub channel_capacity: usize,
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            connect_attempts: 3,
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Message sending and history settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// How long a sent message may wait for `message:sent` before failing.
    pub ack_timeout: Duration,
    pub max_content_size: usize,
    /// Number of records requested when a conversation is opened.
    pub history_page_size: u32,
    /// Buffer size of the [`crate::client::ChatEvent`] channel.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            max_content_size: MAX_CONTENT_SIZE,
            history_page_size: 50,
            event_buffer: 64,
        }
    }
}

/// Seen-marking settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenConfig {
    /// Quiet period before a batch of visible messages is sent.
    pub debounce: Duration,
    /// Minimum intersection ratio for a message to count as seen.
    pub visibility_threshold: f64,
    /// How long an unconfirmed batch blocks its ids from being re-sent.
    pub confirm_timeout: Duration,
}

impl Default for SeenConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            visibility_threshold: 0.5,
            confirm_timeout: Duration::from_secs(5),
        }
    }
}

/// Typing indicator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingConfig {
    /// Idle period after the last keystroke before `typing:stop` is sent.
    pub idle: Duration,
    /// How long a remote `typing:start` is shown without a matching stop.
    pub remote_expiry: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(1),
            remote_expiry: Duration::from_secs(5),
        }
    }
}

/// Display preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preferences {
    pub show_timestamps: bool,
    pub widget_position: WidgetPosition,
    /// chrono format string used when timestamps are shown.
    pub timestamp_format: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            show_timestamps: true,
            widget_position: WidgetPosition::default(),
            timestamp_format: "%H:%M".to_string(),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    // -- Identity / endpoints --
    /// WebSocket URL of the event hub.
    pub server_url: Option<String>,
    /// Base HTTP URL of the history endpoints.
    pub history_url: Option<String>,
    pub user_id: Option<String>,
    /// Bearer credential from the session provider.
    pub token: Option<String>,
    /// Counterpart to chat with.
    pub peer_id: Option<String>,
    pub role: Role,

    pub connection: ConnectionConfig,
    pub chat: ChatConfig,
    pub seen: SeenConfig,
    pub typing: TypingConfig,
    pub preferences: Preferences,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            history_url: None,
            user_id: None,
            token: None,
            peer_id: None,
            role: Role::default(),
            connection: ConnectionConfig::default(),
            chat: ChatConfig::default(),
            seen: SeenConfig::default(),
            typing: TypingConfig::default(),
            preferences: Preferences::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a resolved value is out of range.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let net = &file.network;
        let rc = &file.reconnect;

        Self {
            server_url: cli.server_url.clone().or_else(|| net.server_url.clone()),
            history_url: cli.history_url.clone().or_else(|| net.history_url.clone()),
            user_id: cli.user_id.clone().or_else(|| net.user_id.clone()),
            token: cli.token.clone().or_else(|| net.token.clone()),
            peer_id: cli.peer.clone().or_else(|| net.peer_id.clone()),
            role: cli.role.or(net.role).unwrap_or(defaults.role),
            connection: ConnectionConfig {
                connect_timeout: net
                    .connect_timeout_secs
                    .map_or(defaults.connection.connect_timeout, Duration::from_secs),
                connect_attempts: net
                    .connect_attempts
                    .unwrap_or(defaults.connection.connect_attempts),
                channel_capacity: net
                    .channel_capacity
                    .unwrap_or(defaults.connection.channel_capacity),
                reconnect: ReconnectConfig {
                    initial_delay: rc
                        .initial_delay_ms
                        .map_or(defaults.connection.reconnect.initial_delay, Duration::from_millis),
                    max_delay: rc
                        .max_delay_ms
                        .map_or(defaults.connection.reconnect.max_delay, Duration::from_millis),
                    multiplier: rc
                        .multiplier
                        .unwrap_or(defaults.connection.reconnect.multiplier),
                    max_attempts: rc.max_attempts.or(defaults.connection.reconnect.max_attempts),
                },
            },
            chat: ChatConfig {
                ack_timeout: file
                    .chat
                    .ack_timeout_secs
                    .map_or(defaults.chat.ack_timeout, Duration::from_secs),
                max_content_size: file
                    .chat
                    .max_content_size
                    .unwrap_or(defaults.chat.max_content_size),
                history_page_size: file
                    .chat
                    .history_page_size
                    .unwrap_or(defaults.chat.history_page_size),
                event_buffer: file.chat.event_buffer.unwrap_or(defaults.chat.event_buffer),
            },
            seen: SeenConfig {
                debounce: file
                    .seen
                    .debounce_ms
                    .map_or(defaults.seen.debounce, Duration::from_millis),
                visibility_threshold: file
                    .seen
                    .visibility_threshold
                    .unwrap_or(defaults.seen.visibility_threshold),
                confirm_timeout: file
                    .seen
                    .confirm_timeout_secs
                    .map_or(defaults.seen.confirm_timeout, Duration::from_secs),
            },
            typing: TypingConfig {
                idle: file
                    .typing
                    .idle_ms
                    .map_or(defaults.typing.idle, Duration::from_millis),
                remote_expiry: file
                    .typing
                    .remote_expiry_ms
                    .map_or(defaults.typing.remote_expiry, Duration::from_millis),
            },
            preferences: Preferences {
                show_timestamps: cli
                    .hide_timestamps
                    .then_some(false)
                    .or(file.preferences.show_timestamps)
                    .unwrap_or(defaults.preferences.show_timestamps),
                widget_position: file
                    .preferences
                    .widget_position
                    .unwrap_or(defaults.preferences.widget_position),
                timestamp_format: file
                    .preferences
                    .timestamp_format
                    .clone()
                    .unwrap_or(defaults.preferences.timestamp_format),
            },
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.seen.visibility_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "seen.visibility_threshold",
                reason: format!("{threshold} is not in (0, 1]"),
            });
        }
        if self.connection.reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                field: "reconnect.multiplier",
                reason: "must be at least 1.0".to_string(),
            });
        }
        if self.connection.connect_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "network.connect_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let format = &self.preferences.timestamp_format;
        if chrono::format::StrftimeItems::new(format)
            .any(|item| matches!(item, chrono::format::Item::Error))
        {
            return Err(ConfigError::Invalid {
                field: "preferences.timestamp_format",
                reason: format!("{format:?} is not a valid strftime pattern"),
            });
        }
        if self.connection.channel_capacity == 0 || self.chat.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "network.channel_capacity",
                reason: "channel capacities must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL of the REST history endpoints.
    ///
    /// Uses `history_url` when set, otherwise the event hub's origin with
    /// the scheme mapped `ws` to `http` and `wss` to `https`.
    #[must_use]
    pub fn history_base(&self) -> Option<String> {
        if let Some(url) = &self.history_url {
            return Some(url.clone());
        }
        let mut url = url::Url::parse(self.server_url.as_deref()?).ok()?;
        let scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            _ => return None,
        };
        url.set_scheme(scheme).ok()?;
        url.set_path("/");
        url.set_query(None);
        Some(url.to_string())
    }

    /// The conversation this client is configured to open, if both
    /// participants are known.
    #[must_use]
    pub fn conversation_key(&self) -> Option<ConversationKey> {
        let me = UserId::new(self.user_id.clone()?);
        let peer = UserId::new(self.peer_id.clone().filter(|p| !p.is_empty())?);
        Some(match self.role {
            Role::User => ConversationKey::new(me, peer),
            Role::Admin => ConversationKey::new(peer, me),
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "CivicChat headless chat client")]
pub struct CliArgs {
    /// WebSocket URL of the event hub.
    #[arg(long, env = "CIVICCHAT_SERVER_URL")]
    pub server_url: Option<String>,

    /// Base URL of the history endpoints.
    #[arg(long, env = "CIVICCHAT_HISTORY_URL")]
    pub history_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "CIVICCHAT_USER_ID")]
    pub user_id: Option<String>,

    /// Bearer token from the session provider.
    #[arg(long, env = "CIVICCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Counterpart to chat with.
    #[arg(long, env = "CIVICCHAT_PEER")]
    pub peer: Option<String>,

    /// Which side of the conversation you are.
    #[arg(long, value_enum)]
    pub role: Option<Role>,

    /// Path to config file (default: `~/.config/civicchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Do not print message timestamps.
    #[arg(long)]
    pub hide_timestamps: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CIVICCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/civicchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("civicchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.connect_attempts, 3);
        assert_eq!(config.connection.channel_capacity, 256);
        assert_eq!(config.connection.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(config.connection.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(config.connection.reconnect.max_attempts, None);
        assert_eq!(config.chat.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.chat.max_content_size, 64 * 1024);
        assert_eq!(config.seen.debounce, Duration::from_millis(300));
        assert!((config.seen.visibility_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.typing.idle, Duration::from_secs(1));
        assert_eq!(config.typing.remote_expiry, Duration::from_secs(5));
        assert!(config.preferences.show_timestamps);
        assert_eq!(config.preferences.widget_position, WidgetPosition::BottomRight);
        assert_eq!(config.role, Role::User);
    }

    #[test]
    fn toml_parsing_full() {
        let toml_str = r#"
[network]
server_url = "ws://example.com:9000/ws"
history_url = "http://example.com:9000"
user_id = "citizen-1"
token = "secret"
peer_id = "admin-1"
role = "user"
connect_timeout_secs = 30
connect_attempts = 5
channel_capacity = 512

[reconnect]
initial_delay_ms = 250
max_delay_ms = 8000
multiplier = 1.5
max_attempts = 10

[chat]
ack_timeout_secs = 20
max_content_size = 32768
history_page_size = 100
event_buffer = 128

[seen]
debounce_ms = 500
visibility_threshold = 0.75
confirm_timeout_secs = 8

[typing]
idle_ms = 1500
remote_expiry_ms = 4000

[preferences]
show_timestamps = false
widget_position = "bottom-left"
timestamp_format = "%H:%M:%S"
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.server_url.as_deref(), Some("ws://example.com:9000/ws"));
        assert_eq!(config.history_url.as_deref(), Some("http://example.com:9000"));
        assert_eq!(config.user_id.as_deref(), Some("citizen-1"));
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.peer_id.as_deref(), Some("admin-1"));
        assert_eq!(config.connection.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.connection.connect_attempts, 5);
        assert_eq!(config.connection.channel_capacity, 512);
        assert_eq!(config.connection.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.connection.reconnect.max_delay, Duration::from_secs(8));
        assert!((config.connection.reconnect.multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.connection.reconnect.max_attempts, Some(10));
        assert_eq!(config.chat.ack_timeout, Duration::from_secs(20));
        assert_eq!(config.chat.max_content_size, 32768);
        assert_eq!(config.chat.history_page_size, 100);
        assert_eq!(config.chat.event_buffer, 128);
        assert_eq!(config.seen.debounce, Duration::from_millis(500));
        assert!((config.seen.visibility_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.seen.confirm_timeout, Duration::from_secs(8));
        assert_eq!(config.typing.idle, Duration::from_millis(1500));
        assert_eq!(config.typing.remote_expiry, Duration::from_secs(4));
        assert!(!config.preferences.show_timestamps);
        assert_eq!(config.preferences.widget_position, WidgetPosition::BottomLeft);
        assert_eq!(config.preferences.timestamp_format, "%H:%M:%S");
    }

    #[test]
    fn toml_parsing_partial() {
        let toml_str = r#"
[seen]
debounce_ms = 100
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let config = ClientConfig::resolve(&CliArgs::default(), &file);

        assert_eq!(config.seen.debounce, Duration::from_millis(100));
        // Everything else should be default.
        assert!((config.seen.visibility_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.connection.channel_capacity, 256);
        assert!(config.server_url.is_none());
    }

    #[test]
    fn cli_overrides_file() {
        let toml_str = r#"
[network]
server_url = "ws://file:9000/ws"
user_id = "file-user"
role = "user"

[preferences]
show_timestamps = true
"#;
        let file: ConfigFile = toml::from_str(toml_str).unwrap();
        let cli = CliArgs {
            server_url: Some("ws://cli:9000/ws".to_string()),
            role: Some(Role::Admin),
            hide_timestamps: true,
            ..Default::default()
        };
        let config = ClientConfig::resolve(&cli, &file);

        assert_eq!(config.server_url.as_deref(), Some("ws://cli:9000/ws"));
        assert_eq!(config.user_id.as_deref(), Some("file-user"));
        assert_eq!(config.role, Role::Admin);
        assert!(!config.preferences.show_timestamps);
    }

    #[test]
    fn conversation_key_depends_on_role() {
        let mut config = ClientConfig {
            user_id: Some("me".to_string()),
            peer_id: Some("them".to_string()),
            ..Default::default()
        };
        let key = config.conversation_key().unwrap();
        assert_eq!(key.user_id.as_str(), "me");
        assert_eq!(key.admin_id.as_str(), "them");

        config.role = Role::Admin;
        let key = config.conversation_key().unwrap();
        assert_eq!(key.user_id.as_str(), "them");
        assert_eq!(key.admin_id.as_str(), "me");

        config.peer_id = Some(String::new());
        assert!(config.conversation_key().is_none());
    }

    #[test]
    fn history_base_falls_back_to_hub_origin() {
        let mut config = ClientConfig {
            server_url: Some("wss://chat.example.org/ws".to_string()),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.history_base().as_deref(),
            Some("https://chat.example.org/")
        );
        config.history_url = Some("http://127.0.0.1:8080/api".to_string());
        assert_eq!(
            config.history_base().as_deref(),
            Some("http://127.0.0.1:8080/api")
        );
        config.history_url = None;
        config.server_url = Some("ftp://nope".to_string());
        assert_eq!(config.history_base(), None);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let mut config = ClientConfig::default();
        config.seen.visibility_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
        config.seen.visibility_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_timestamp_format_is_rejected() {
        let mut config = ClientConfig::default();
        config.preferences.timestamp_format = "%H:%Q".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "preferences.timestamp_format",
                ..
            })
        ));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = load_config_file(None);
        assert!(result.is_ok());
    }

    #[test]
    fn explicit_missing_config_file_returns_error() {
        let result = load_config_file(Some(std::path::Path::new("/nonexistent/config.toml")));
        assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
    }
}
