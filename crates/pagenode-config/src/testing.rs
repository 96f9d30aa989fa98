//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - Temporary pages, files and identity directories
//! - Helpers to populate them, including executable script pages
//!
//! # Usage
//!
//! ```ignore
//! use pagenode_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     env.create_page("index.mu", b"Hello").unwrap();
//!     // env.pages_dir, env.files_dir, env.identity_dir are all isolated
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique content roots
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root of the environment
    pub root: PathBuf,
    /// Pages root
    pub pages_dir: PathBuf,
    /// Files root
    pub files_dir: PathBuf,
    /// Identity directory
    pub identity_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        // Canonical so paths compare equal to what the node resolves
        let root = temp_dir.path().canonicalize()?;

        let pages_dir = root.join("pages");
        let files_dir = root.join("files");
        let identity_dir = root.join("node-config");

        std::fs::create_dir_all(&pages_dir)?;
        std::fs::create_dir_all(&files_dir)?;
        std::fs::create_dir_all(&identity_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            pages_dir,
            files_dir,
            identity_dir,
            test_id,
        })
    }

    /// A config pointing at this environment's directories
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.content.pages_dir = self.pages_dir.clone();
        cfg.content.files_dir = self.files_dir.clone();
        cfg.node.identity_dir = self.identity_dir.clone();
        cfg
    }

    /// Create a page under the pages root
    pub fn create_page(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        write_under(&self.pages_dir, relative_path, content)
    }

    /// Create a file under the files root
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        write_under(&self.files_dir, relative_path, content)
    }

    /// Create a page with the executable bit set
    #[cfg(unix)]
    pub fn create_script(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.create_page(relative_path, content)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Create a directory under the environment root
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }
}

fn write_under(base: &Path, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
    let path = base.join(relative_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, content)?;
    Ok(path)
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
