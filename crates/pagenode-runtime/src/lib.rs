//! # pagenode-runtime
//!
//! Runtime of a page node: a long-running process that advertises itself on
//! an overlay network and serves pages and files from two directory trees.
//!
//! ## Architecture
//!
//! - [`scan`] enumerates servable content under a root
//! - [`resolve`] maps an inbound virtual path back to a real path inside its root
//! - [`handlers`] answer page and file requests
//! - [`registry`] binds virtual paths on the destination and swaps catalogs on rescan
//! - [`scheduler`] runs the announce and refresh loops
//! - [`node`] composes all of the above behind a start/shutdown lifecycle
//!
//! ## Virtual paths
//!
//! Pages are bound at `/page/<relative>` and files at `/file/<relative>`,
//! where `<relative>` is the forward-slash path below the content root.

pub mod handlers;
pub mod node;
pub mod registry;
pub mod resolve;
pub mod scan;
pub mod scheduler;
pub mod script;

use pagenode_config::path::normalize_or_original;
use pagenode_config::Config;
use pagenode_transport::{Identity, TransportError};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use node::NodeRuntime;
pub use registry::{BindingDiff, Registry};

/// Application name the node destination is registered under
pub const APP_NAME: &str = "nomadnetwork";
/// Aspect of [`APP_NAME`] identifying a page node
pub const ASPECT: &str = "node";

/// Virtual namespace for pages
pub const PAGE_PREFIX: &str = "/page/";
/// Virtual namespace for files
pub const FILE_PREFIX: &str = "/file/";

/// Extension a file must carry to be served as a page
pub const PAGE_EXTENSION: &str = "mu";
/// Page served at the root of the page namespace
pub const INDEX_PAGE: &str = "index.mu";

/// Responses up to this size are compressed by the transport
pub const FILE_AUTO_COMPRESS: u64 = 32_000_000;

/// Upper bound for joining both loop threads at shutdown
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Scan error: {0}")]
    Scan(#[from] scan::ScanError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NodeError>;

/// Fully resolved, immutable settings of a running node
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub identity: Identity,
    /// Announced as opaque app data when set
    pub display_name: Option<String>,
    pub pages_root: PathBuf,
    pub files_root: PathBuf,
    /// Zero announces once at startup only
    pub announce_interval: Duration,
    /// Zero disables page rescans
    pub page_refresh_interval: Duration,
    /// Zero disables file rescans
    pub file_refresh_interval: Duration,
    pub join_timeout: Duration,
}

impl NodeSettings {
    /// Settings with the default cadence: announce every six hours, no rescans
    pub fn new(identity: Identity, pages_root: &Path, files_root: &Path) -> Self {
        Self {
            identity,
            display_name: None,
            pages_root: normalize_or_original(pages_root),
            files_root: normalize_or_original(files_root),
            announce_interval: minutes(360),
            page_refresh_interval: Duration::ZERO,
            file_refresh_interval: Duration::ZERO,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Build settings from a loaded config. Relative directories must
    /// already be resolved.
    pub fn from_config(config: &Config, identity: Identity) -> Self {
        let mut settings = Self::new(
            identity,
            &config.content.pages_dir,
            &config.content.files_dir,
        );
        settings.display_name = config.node.name.clone().filter(|n| !n.is_empty());
        settings.announce_interval = minutes(config.node.announce_interval);
        settings.page_refresh_interval = Duration::from_secs(config.content.page_refresh_interval);
        settings.file_refresh_interval = Duration::from_secs(config.content.file_refresh_interval);
        settings
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}
