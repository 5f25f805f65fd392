//! Configuration system for the `PairChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use pairchat_proto::user::UserId;
use url::Url;

use crate::channel::ws::ReconnectPolicy;
use crate::chat::SurfaceConfig;
use crate::chat::receipts::Pacing;
use crate::session::Session;

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

    /// A configured URL is not valid.
    #[error("invalid {field} {value:?}: {source}")]
    InvalidUrl {
        /// Which setting held the URL.
        field: &'static str,
        /// The rejected value.
        value: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// A buffer size of zero was configured.
    #[error("{0} must be greater than zero")]
    ZeroBuffer(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    sync: SyncFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    channel_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section. Tokens come only from the CLI or environment.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    ack_pacing_ms: Option<u64>,
    read_confirm_delay_ms: Option<u64>,
    event_buffer: Option<usize>,
    command_buffer: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/";
const DEFAULT_CHANNEL_URL: &str = "ws://127.0.0.1:8080/ws";
const DEFAULT_EVENT_BUFFER: usize = 64;
const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the request API.
    pub api_url: Url,
    /// WebSocket URL of the channel.
    pub channel_url: Url,
    /// Timeout of a single API request.
    pub request_timeout: Duration,

    // -- Session --
    /// Session user, if configured.
    pub user_id: Option<String>,
    /// Bearer token, if configured.
    pub token: Option<String>,

    // -- Sync --
    /// Acknowledgement timers.
    pub pacing: Pacing,
    /// Capacity of the surface event queue.
    pub event_buffer: usize,
    /// Capacity of the command queue feeding the surface.
    pub command_buffer: usize,

    // -- Reconnect --
    /// Channel reconnection backoff.
    pub reconnect: ReconnectPolicy,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// Otherwise the default path (`~/.config/pairchat/config.toml`) is
    /// tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a resolved value is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let pacing = Pacing::default();
        let reconnect = ReconnectPolicy::default();

        let api_url = parse_url(
            "api_url",
            cli.api_url
                .as_deref()
                .or(file.server.api_url.as_deref())
                .unwrap_or(DEFAULT_API_URL),
        )?;
        let channel_url = parse_url(
            "channel_url",
            cli.channel_url
                .as_deref()
                .or(file.server.channel_url.as_deref())
                .unwrap_or(DEFAULT_CHANNEL_URL),
        )?;

        let event_buffer = file.sync.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER);
        if event_buffer == 0 {
            return Err(ConfigError::ZeroBuffer("event_buffer"));
        }
        let command_buffer = file.sync.command_buffer.unwrap_or(DEFAULT_COMMAND_BUFFER);
        if command_buffer == 0 {
            return Err(ConfigError::ZeroBuffer("command_buffer"));
        }

        Ok(Self {
            api_url,
            channel_url,
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(crate::service::http::DEFAULT_TIMEOUT, Duration::from_secs),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            token: cli.token.clone(),
            pacing: Pacing {
                ack_pacing: file
                    .sync
                    .ack_pacing_ms
                    .map_or(pacing.ack_pacing, Duration::from_millis),
                read_confirm_delay: file
                    .sync
                    .read_confirm_delay_ms
                    .map_or(pacing.read_confirm_delay, Duration::from_millis),
            },
            event_buffer,
            command_buffer,
            reconnect: ReconnectPolicy {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(reconnect.max_delay, Duration::from_millis),
                max_attempts: file
                    .reconnect
                    .max_attempts
                    .unwrap_or(reconnect.max_attempts),
            },
        })
    }

    /// Tunables for the chat surface.
    #[must_use]
    pub const fn surface_config(&self) -> SurfaceConfig {
        SurfaceConfig {
            pacing: self.pacing,
            event_buffer: self.event_buffer,
        }
    }

    /// Build the [`Session`] if both user id and token are present.
    ///
    /// Returns `None` if either is missing or blank.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        let user_id = self.user_id.as_deref().filter(|s| !s.trim().is_empty())?;
        let token = self.token.as_deref().filter(|s| !s.trim().is_empty())?;
        Some(Session::new(UserId::new(user_id), token))
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
        field,
        value: raw.to_string(),
        source,
    })
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time pairwise chat client")]
pub struct CliArgs {
    /// Base URL of the chat request API.
    #[arg(long, env = "PAIRCHAT_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the chat channel.
    #[arg(long, env = "PAIRCHAT_CHANNEL_URL")]
    pub channel_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "PAIRCHAT_USER")]
    pub user_id: Option<String>,

    /// Bearer token issued at login.
    #[arg(long, env = "PAIRCHAT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/pairchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pairchat.log`).
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
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("pairchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
