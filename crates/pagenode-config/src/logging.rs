//! Structured logging utilities for page-node components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use pagenode_config::{log_node_info, log_page_warn};
//!
//! log_node_info!("Node started", address = hash);
//! log_page_warn!("Script exited non-zero", path = path.display());
//! ```
//!
//! Field values are recorded with their `Display` impl.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[serde(alias = "critical", alias = "CRITICAL", alias = "ERROR")]
    Error,
    #[serde(alias = "warning", alias = "WARNING", alias = "WARN")]
    Warn,
    #[default]
    #[serde(alias = "INFO")]
    Info,
    #[serde(alias = "DEBUG")]
    Debug,
    #[serde(alias = "TRACE")]
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct ParseLogLevelError(String);

impl FromStr for LogLevel {
    type Err = ParseLogLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" | "error" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(ParseLogLevelError(s.to_string())),
        }
    }
}

// === NODE logging macros ===

#[macro_export]
macro_rules! log_node_error {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::error!(component = "NODE", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_node_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "NODE", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_node_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "NODE", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_node_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "NODE", $($key = %$value,)* $msg)
    };
}

// === SCHED logging macros ===

#[macro_export]
macro_rules! log_sched_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SCHED", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sched_info {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::info!(component = "SCHED", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_sched_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SCHED", $($key = %$value,)* $msg)
    };
}

// === PAGE logging macros ===

#[macro_export]
macro_rules! log_page_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "PAGE", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_page_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "PAGE", $($key = %$value,)* $msg)
    };
}

// === FILE logging macros ===

#[macro_export]
macro_rules! log_file_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "FILE", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_file_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "FILE", $($key = %$value,)* $msg)
    };
}

// === SCAN logging macros ===

#[macro_export]
macro_rules! log_scan_warn {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::warn!(component = "SCAN", $($key = %$value,)* $msg)
    };
}

#[macro_export]
macro_rules! log_scan_debug {
    ($msg:literal $(, $key:ident = $value:expr)* $(,)?) => {
        tracing::debug!(component = "SCAN", $($key = %$value,)* $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup. `RUST_LOG` wins when set.
/// Output goes to stderr; stdout belongs to command output.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
