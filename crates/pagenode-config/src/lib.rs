//! # pagenode-config
//!
//! Configuration management for page-node.
//!
//! Values are resolved from, in increasing priority:
//! 1. Built-in defaults
//! 2. A TOML config file (explicit path, or `<config_dir>/page-node/config.toml`)
//! 3. Environment variables (`PAGENODE_*`)
//! 4. Command-line flags, applied by the binary through [`ConfigOverrides`]

pub mod logging;
pub mod path;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use logging::LogLevel;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub content: ContentConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from an explicit file, or from the user config dir when `path` is None.
    ///
    /// Environment overrides are applied on top of whatever was loaded.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::load_file(path)?;
        for e in config.apply_env_overrides() {
            warn!(error = %e, "Ignoring environment override");
        }
        Ok(config)
    }

    /// Like [`Config::load`], but a file that cannot be loaded falls back to
    /// the defaults and environment overrides still apply.
    ///
    /// Returns every problem met on the way, for callers that report them once
    /// logging is up: the load error first, then rejected `PAGENODE_*` values.
    pub fn load_or_default(path: Option<&Path>) -> (Self, Vec<ConfigError>) {
        let mut problems = Vec::new();
        let mut config = Self::load_file(path).unwrap_or_else(|e| {
            problems.push(e);
            Config::default()
        });
        problems.extend(config.apply_env_overrides());
        (config, problems)
    }

    /// The file layer alone: explicit file, user config file or defaults
    fn load_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::user_config_path() {
                Some(user_path) if user_path.is_file() => Self::from_file(&user_path),
                _ => Ok(Config::default()),
            },
        }
    }

    /// Parse a single TOML file, without env overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// User config path: <config_dir>/page-node/config.toml
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("page-node").join("config.toml"))
    }

    /// Apply environment variable overrides, returning the values rejected
    fn apply_env_overrides(&mut self) -> Vec<ConfigError> {
        let mut rejected = Vec::new();
        if let Ok(dir) = std::env::var("PAGENODE_PAGES_DIR") {
            self.content.pages_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PAGENODE_FILES_DIR") {
            self.content.files_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("PAGENODE_IDENTITY_DIR") {
            self.node.identity_dir = PathBuf::from(dir);
        }
        if let Ok(name) = std::env::var("PAGENODE_NODE_NAME") {
            self.node.name = Some(name);
        }
        if let Ok(minutes) = std::env::var("PAGENODE_ANNOUNCE_INTERVAL") {
            match minutes.parse() {
                Ok(n) => self.node.announce_interval = n,
                Err(_) => rejected.push(ConfigError::InvalidValue {
                    key: "PAGENODE_ANNOUNCE_INTERVAL",
                    value: minutes,
                }),
            }
        }
        if let Ok(level) = std::env::var("PAGENODE_LOG_LEVEL") {
            match level.parse() {
                Ok(l) => self.logging.level = l,
                Err(_) => rejected.push(ConfigError::InvalidValue {
                    key: "PAGENODE_LOG_LEVEL",
                    value: level,
                }),
            }
        }
        rejected
    }

    /// Apply command-line overrides (highest priority)
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.pages_dir {
            self.content.pages_dir = dir;
        }
        if let Some(dir) = overrides.files_dir {
            self.content.files_dir = dir;
        }
        if let Some(name) = overrides.node_name {
            self.node.name = Some(name);
        }
        if let Some(minutes) = overrides.announce_interval {
            self.node.announce_interval = minutes;
        }
        if let Some(dir) = overrides.identity_dir {
            self.node.identity_dir = dir;
        }
        if let Some(secs) = overrides.page_refresh_interval {
            self.content.page_refresh_interval = secs;
        }
        if let Some(secs) = overrides.file_refresh_interval {
            self.content.file_refresh_interval = secs;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(path) = overrides.transport_config {
            self.transport.config = Some(path);
        }
    }

    /// Make every relative directory absolute against `base`
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for dir in [
            &mut self.content.pages_dir,
            &mut self.content.files_dir,
            &mut self.node.identity_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Config::default())
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub pages_dir: Option<PathBuf>,
    pub files_dir: Option<PathBuf>,
    pub node_name: Option<String>,
    pub announce_interval: Option<u64>,
    pub identity_dir: Option<PathBuf>,
    pub page_refresh_interval: Option<u64>,
    pub file_refresh_interval: Option<u64>,
    pub log_level: Option<LogLevel>,
    pub transport_config: Option<PathBuf>,
}

/// Node identity and presence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NodeConfig {
    /// Display name attached to announces
    pub name: Option<String>,
    /// Minutes between announces (0 = announce once at startup)
    pub announce_interval: u64,
    /// Directory holding the `identity` file
    pub identity_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: None,
            announce_interval: 360,
            identity_dir: PathBuf::from("node-config"),
        }
    }
}

/// Served content roots and rescan cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ContentConfig {
    pub pages_dir: PathBuf,
    pub files_dir: PathBuf,
    /// Seconds between page rescans (0 = disabled)
    pub page_refresh_interval: u64,
    /// Seconds between file rescans (0 = disabled)
    pub file_refresh_interval: u64,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            pages_dir: PathBuf::from("pages"),
            files_dir: PathBuf::from("files"),
            page_refresh_interval: 0,
            file_refresh_interval: 0,
        }
    }
}

/// Transport settings, passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}
