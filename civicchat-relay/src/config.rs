//! Configuration for the `CivicChat` relay.
//!
//! Priority (highest first): CLI arguments, environment variables (via clap
//! `env`), TOML file (`~/.config/civicchat-relay/config.toml`), compiled
//! defaults.

use std::path::PathBuf;

use civicchat_proto::message::MAX_CONTENT_SIZE;

use crate::store::DEFAULT_HISTORY_LIMIT;

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_content_size: Option<usize>,
    history_limit: Option<u32>,
    auth_token: Option<String>,
}

/// CLI arguments for the relay.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "CivicChat event hub and history server")]
pub struct RelayCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "RELAY_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/civicchat-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message content size in bytes.
    #[arg(long)]
    pub max_content_size: Option<usize>,

    /// Token every client must present. Unset accepts any non-empty token.
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "RELAY_LOG")]
    pub log_level: String,
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub max_content_size: usize,
    /// Upper bound on one history page.
    pub history_limit: u32,
    pub auth_token: Option<String>,
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            max_content_size: MAX_CONTENT_SIZE,
            history_limit: DEFAULT_HISTORY_LIMIT,
            auth_token: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();
        let server = &file.server;
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_content_size: cli
                .max_content_size
                .or(server.max_content_size)
                .unwrap_or(defaults.max_content_size),
            history_limit: server.history_limit.unwrap_or(defaults.history_limit),
            auth_token: cli
                .auth_token
                .clone()
                .or_else(|| server.auth_token.clone())
                .filter(|t| !t.is_empty()),
            log_level: cli.log_level.clone(),
        }
    }
}

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<RelayConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(RelayConfigFile::default());
    };
    let path = config_dir.join("civicchat-relay").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
