//! Content scanning
//!
//! Enumerates the servable files under a content root. Hidden entries are
//! pruned together with their whole subtree; directories are descended into
//! but never returned themselves. Symlinks that resolve outside the root are
//! pruned, so every returned path stays under the root once resolved.

use pagenode_config::path::is_hidden;
use pagenode_config::{log_scan_debug, log_scan_warn};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Cannot read content root {}: {source}", root.display())]
    Root {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("Cannot resolve content root {}: {source}", root.display())]
    Canonicalize {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which files under a root are servable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    /// Files whose name ends in `.<extension>`
    Pages { extension: String },
    /// Every regular file
    Files,
}

impl ScanFilter {
    pub fn pages(extension: &str) -> Self {
        ScanFilter::Pages {
            extension: extension.to_string(),
        }
    }

    pub fn matches(&self, name: &OsStr) -> bool {
        match self {
            ScanFilter::Pages { extension } => {
                let name = name.as_encoded_bytes();
                name.len() > extension.len()
                    && name.ends_with(extension.as_bytes())
                    && name[name.len() - extension.len() - 1] == b'.'
            }
            ScanFilter::Files => true,
        }
    }
}

/// Scan `root` and return every servable path below it, sorted.
///
/// A missing root yields an empty list. An unreadable root is an error;
/// unreadable entries below it are skipped. Symlinks are followed unless they
/// lead out of the root. The returned paths keep the `root` prefix as given.
pub fn scan(root: &Path, filter: &ScanFilter) -> Result<Vec<PathBuf>, ScanError> {
    if !root.exists() {
        log_scan_debug!("Content root missing, nothing to serve", root = root.display());
        return Ok(Vec::new());
    }
    let canonical_root = root.canonicalize().map_err(|source| ScanError::Canonicalize {
        root: root.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        // The root itself may live under a hidden directory
        .filter_entry(|entry| {
            entry.depth() == 0
                || (!is_hidden(entry.file_name()) && !escapes_root(entry, &canonical_root))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(ScanError::Root {
                    root: root.to_path_buf(),
                    source: e,
                })
            }
            Err(e) => {
                let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                log_scan_warn!("Skipping unreadable entry", path = path, error = e);
                continue;
            }
        };

        if entry.depth() == 0 || !entry.file_type().is_file() {
            continue;
        }
        if filter.matches(entry.file_name()) {
            found.push(entry.into_path());
        }
    }

    found.sort();
    log_scan_debug!("Scan complete", root = root.display(), count = found.len());
    Ok(found)
}

/// True for a symlink whose target resolves outside `canonical_root`.
///
/// Plain entries below an accepted link already live under the root, so only
/// link entries are resolved.
fn escapes_root(entry: &DirEntry, canonical_root: &Path) -> bool {
    if !entry.path_is_symlink() {
        return false;
    }
    match entry.path().canonicalize() {
        Ok(target) if target.starts_with(canonical_root) => false,
        Ok(target) => {
            log_scan_warn!(
                "Skipping symlink leading outside the content root",
                path = entry.path().display(),
                target = target.display()
            );
            true
        }
        Err(e) => {
            log_scan_warn!(
                "Skipping unresolvable symlink",
                path = entry.path().display(),
                error = e
            );
            true
        }
    }
}
