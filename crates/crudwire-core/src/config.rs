//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/crudwire/config.toml)
//! 3. Environment variables (CRUDWIRE_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionConfig;
use crate::sync::SyncOptions;

/// Environment variable prefix
const ENV_PREFIX: &str = "CRUDWIRE";

/// Default backend endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:5000/ws";

/// Default delay between a close and the next connection attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket endpoint of the backend
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Fixed delay before reconnecting after a close, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Upper bound on a single connection attempt, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long a front end waits for the server to confirm an action, in seconds
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Request both collections every time a connection opens
    #[serde(default = "default_true")]
    pub resync_on_connect: bool,

    /// Apply updates and deletes locally before the server confirms them
    #[serde(default)]
    pub optimistic_updates: bool,

    /// Assign UUIDs to new entities instead of waiting for the server
    #[serde(default)]
    pub client_generated_ids: bool,

    /// Attach a request_id to outbound actions so the server can acknowledge them
    ///
    /// Only for servers that accept the extra key; off by default.
    #[serde(default)]
    pub request_ids: bool,

    /// Log file path (optional, default: stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            resync_on_connect: true,
            optimistic_updates: false,
            client_generated_ids: false,
            request_ids: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (CRUDWIRE_URL, CRUDWIRE_RECONNECT_DELAY_MS, CRUDWIRE_OPTIMISTIC)
    /// 2. Config file (~/.config/crudwire/config.toml or CRUDWIRE_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring a path given on the command line
    pub fn load_with_cli_override(cli_path: Option<&PathBuf>) -> Result<Self> {
        match cli_path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // CRUDWIRE_URL
        if let Ok(val) = std::env::var(format!("{}_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        // CRUDWIRE_RECONNECT_DELAY_MS
        if let Ok(val) = std::env::var(format!("{}_RECONNECT_DELAY_MS", ENV_PREFIX)) {
            if let Ok(ms) = val.parse() {
                self.reconnect_delay_ms = ms;
            }
        }

        // CRUDWIRE_OPTIMISTIC
        if let Ok(val) = std::env::var(format!("{}_OPTIMISTIC", ENV_PREFIX)) {
            self.optimistic_updates = val.eq_ignore_ascii_case("true") || val == "1";
        }
    }

    /// Check values that would make the client unusable
    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("ws://") || self.server_url.starts_with("wss://")) {
            bail!(
                "Invalid server_url '{}': expected a ws:// or wss:// URL",
                self.server_url
            );
        }
        if self.connect_timeout_secs == 0 {
            bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with CRUDWIRE_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("crudwire")
            .join("config.toml")
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    /// Settings for the connection manager
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.server_url.clone(),
            reconnect_delay: self.reconnect_delay(),
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Settings for the state synchronizer
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            resync_on_connect: self.resync_on_connect,
            optimistic_updates: self.optimistic_updates,
            client_generated_ids: self.client_generated_ids,
            request_ids: self.request_ids,
        }
    }
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_confirm_timeout_secs() -> u64 {
    10
}

fn default_true() -> bool {
    true
}
