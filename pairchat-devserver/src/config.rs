//! Configuration system for the `PairChat` development server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat-devserver/config.toml`)
//! 4. Compiled defaults
//!
//! Users are seeded from `[[users]]` tables in the file and from repeated
//! `--user id:name:token` arguments.

use std::path::PathBuf;

use pairchat_proto::user::UserProfile;

use crate::state::DevState;

/// Errors that can occur when loading server configuration.
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

    /// A `--user` argument is not `id:name:token`.
    #[error("invalid user entry {0:?} (expected id:name:token)")]
    InvalidUser(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DevConfigFile {
    server: ServerFileConfig,
    users: Vec<SeedUser>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// A user registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct SeedUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub username: String,
    /// Bearer token the user authenticates with.
    pub token: String,
}

impl std::str::FromStr for SeedUser {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(username), Some(token))
                if !id.is_empty() && !username.is_empty() && !token.is_empty() =>
            {
                Ok(Self {
                    id: id.to_string(),
                    username: username.to_string(),
                    token: token.to_string(),
                })
            }
            _ => Err(ConfigError::InvalidUser(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the development server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PairChat development server")]
pub struct DevCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "PAIRCHAT_DEV_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/pairchat-devserver/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Extra user as `id:name:token`; may be repeated.
    #[arg(long = "user")]
    pub users: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_DEV_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:8080`).
    pub bind_addr: String,
    /// Users registered at startup.
    pub users: Vec<SeedUser>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl DevConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or a `--user` argument is malformed.
    pub fn load(cli: &DevCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    /// Priority: CLI > file > default. CLI users are added after file users
    /// and win on id clashes.
    fn resolve(cli: &DevCliArgs, file: DevConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut users = file.users;
        for entry in &cli.users {
            let user: SeedUser = entry.parse()?;
            users.retain(|u| u.id != user.id);
            users.push(user);
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            users,
            log_level: cli.log_level.clone(),
        })
    }

    /// Builds the server state with every seed user registered.
    pub async fn seeded_state(&self) -> DevState {
        let state = DevState::new();
        for user in &self.users {
            state
                .add_user(UserProfile::new(user.id.as_str(), user.username.as_str()), user.token.as_str())
                .await;
        }
        state
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<DevConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(DevConfigFile::default());
        };
        config_dir.join("pairchat-devserver").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DevConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
