//! Request routing: which virtual path is bound to which handler.
//!
//! Every registration pass scans its root, builds a fresh [`Catalog`], diffs
//! it against the current one, applies the diff to the destination and then
//! swaps the catalog in. Readers load the current catalog without locking and
//! never observe a partially built one. Paths that disappeared since the last
//! pass are deregistered. Passes over the same root run one at a time, so a
//! catalog is never replaced by an older scan.

use arc_swap::ArcSwap;
use pagenode_config::path::posix_relative;
use pagenode_config::{log_node_debug, log_scan_warn};
use pagenode_transport::{AccessPolicy, Destination, HandlerOptions, Responder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::handlers::{default_index_responder, FileHandler, PageHandler};
use crate::scan::{scan, ScanFilter};
use crate::{Result, FILE_AUTO_COMPRESS, FILE_PREFIX, INDEX_PAGE, PAGE_EXTENSION, PAGE_PREFIX};

/// What a virtual path is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Fixed default home page, no filesystem access
    DefaultIndex,
    Page(PathBuf),
    File(PathBuf),
}

impl Binding {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Binding::DefaultIndex => None,
            Binding::Page(path) | Binding::File(path) => Some(path),
        }
    }
}

/// Result of one successful scan of a content root
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Catalog {
    /// Scanned paths, sorted
    pub served: Vec<PathBuf>,
    /// Virtual path to binding
    pub bindings: BTreeMap<String, Binding>,
}

/// Changes applied to the destination by one registration pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BindingDiff {
    /// Newly bound, or rebound to a different target
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl BindingDiff {
    pub fn between(previous: &BTreeMap<String, Binding>, next: &BTreeMap<String, Binding>) -> Self {
        let added = next
            .iter()
            .filter(|(path, binding)| previous.get(*path) != Some(*binding))
            .map(|(path, _)| path.clone())
            .collect();
        let removed = previous
            .keys()
            .filter(|path| !next.contains_key(*path))
            .cloned()
            .collect();
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct Registry {
    destination: Arc<dyn Destination>,
    pages_root: PathBuf,
    files_root: PathBuf,
    page_handler: Arc<PageHandler>,
    file_handler: Arc<FileHandler>,
    pages: ArcSwap<Catalog>,
    files: ArcSwap<Catalog>,
    /// Held for a whole scan-and-apply pass over one root
    pages_pass: Mutex<()>,
    files_pass: Mutex<()>,
    /// Serializes diff-and-apply across both roots
    apply_lock: Mutex<()>,
}

impl Registry {
    pub fn new(destination: Arc<dyn Destination>, pages_root: &Path, files_root: &Path) -> Self {
        Self {
            destination,
            pages_root: pages_root.to_path_buf(),
            files_root: files_root.to_path_buf(),
            page_handler: Arc::new(PageHandler::new(pages_root)),
            file_handler: Arc::new(FileHandler::new(files_root)),
            pages: ArcSwap::from_pointee(Catalog::default()),
            files: ArcSwap::from_pointee(Catalog::default()),
            pages_pass: Mutex::new(()),
            files_pass: Mutex::new(()),
            apply_lock: Mutex::new(()),
        }
    }

    /// Scan the pages root and bind `/page/<relative>` for every page.
    ///
    /// Without an index page at the root, the index path is bound to the
    /// fixed default content.
    pub fn register_pages(&self) -> Result<BindingDiff> {
        let _pass = self.pages_pass.lock().unwrap_or_else(PoisonError::into_inner);
        let served = scan(&self.pages_root, &ScanFilter::pages(PAGE_EXTENSION))?;

        let mut bindings = BTreeMap::new();
        if !self.pages_root.join(INDEX_PAGE).is_file() {
            bindings.insert(format!("{PAGE_PREFIX}{INDEX_PAGE}"), Binding::DefaultIndex);
        }
        for path in &served {
            if let Some(virtual_path) = virtual_path(PAGE_PREFIX, &self.pages_root, path) {
                bindings.insert(virtual_path, Binding::Page(path.clone()));
            }
        }

        self.apply(&self.pages, Catalog { served, bindings })
    }

    /// Scan the files root and bind `/file/<relative>` for every file
    pub fn register_files(&self) -> Result<BindingDiff> {
        let _pass = self.files_pass.lock().unwrap_or_else(PoisonError::into_inner);
        let served = scan(&self.files_root, &ScanFilter::Files)?;

        let mut bindings = BTreeMap::new();
        for path in &served {
            if let Some(virtual_path) = virtual_path(FILE_PREFIX, &self.files_root, path) {
                bindings.insert(virtual_path, Binding::File(path.clone()));
            }
        }

        self.apply(&self.files, Catalog { served, bindings })
    }

    /// Current page catalog snapshot
    pub fn served_pages(&self) -> Arc<Catalog> {
        self.pages.load_full()
    }

    /// Current file catalog snapshot
    pub fn served_files(&self) -> Arc<Catalog> {
        self.files.load_full()
    }

    /// Every bound virtual path, sorted
    pub fn bindings(&self) -> Vec<String> {
        let pages = self.pages.load();
        let files = self.files.load();
        let mut all: Vec<String> = pages
            .bindings
            .keys()
            .chain(files.bindings.keys())
            .cloned()
            .collect();
        all.sort();
        all
    }

    fn apply(&self, slot: &ArcSwap<Catalog>, next: Catalog) -> Result<BindingDiff> {
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = slot.load_full();
        let diff = BindingDiff::between(&previous.bindings, &next.bindings);

        for path in &diff.removed {
            self.destination.deregister_handler(path);
        }
        for path in &diff.added {
            if let Some(binding) = next.bindings.get(path) {
                let (responder, options) = self.responder_for(binding);
                self.destination
                    .register_handler(path, responder, AccessPolicy::AllowAll, options)?;
            }
        }

        if !diff.is_empty() {
            log_node_debug!(
                "Bindings updated",
                added = diff.added.len(),
                removed = diff.removed.len()
            );
        }
        slot.store(Arc::new(next));
        Ok(diff)
    }

    fn responder_for(&self, binding: &Binding) -> (Responder, HandlerOptions) {
        match binding {
            Binding::DefaultIndex => (default_index_responder(), HandlerOptions::default()),
            Binding::Page(_) => (self.page_handler.clone().responder(), HandlerOptions::default()),
            Binding::File(_) => (
                self.file_handler.clone().responder(),
                HandlerOptions {
                    auto_compress: Some(FILE_AUTO_COMPRESS),
                },
            ),
        }
    }
}

/// `<prefix><relative>` for a scanned path, or None if it has no posix form
fn virtual_path(prefix: &str, root: &Path, path: &Path) -> Option<String> {
    match posix_relative(root, path) {
        Some(relative) => Some(format!("{prefix}{relative}")),
        None => {
            log_scan_warn!("Skipping path without a virtual form", path = path.display());
            None
        }
    }
}
