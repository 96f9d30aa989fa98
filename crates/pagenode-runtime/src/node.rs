//! Node lifecycle.
//!
//! [`NodeRuntime`] owns the registry and the scheduler for one destination.
//! Starting it registers all content, installs the link hook and spawns the
//! background loops; shutting it down stops the loops with a bounded join and
//! then closes the destination.

use pagenode_config::{log_node_debug, log_node_info, log_node_warn};
use pagenode_transport::{Destination, DestinationHash, LinkInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::registry::{BindingDiff, Catalog, Registry};
use crate::scheduler::{Intervals, ScheduledWork, Scheduler};
use crate::{NodeSettings, Result};

/// What the background loops do on this node
struct NodeWork {
    destination: Arc<dyn Destination>,
    registry: Arc<Registry>,
    app_data: Option<Vec<u8>>,
}

impl ScheduledWork for NodeWork {
    fn announce(&self) -> Result<()> {
        self.destination.announce(self.app_data.as_deref())?;
        Ok(())
    }

    fn refresh_pages(&self) -> Result<()> {
        self.registry.register_pages().map(log_refresh)
    }

    fn refresh_files(&self) -> Result<()> {
        self.registry.register_files().map(log_refresh)
    }
}

fn log_refresh(diff: BindingDiff) {
    if !diff.is_empty() {
        log_node_info!(
            "Content changed",
            added = diff.added.len(),
            removed = diff.removed.len()
        );
    }
}

pub struct NodeRuntime {
    settings: NodeSettings,
    destination: Arc<dyn Destination>,
    registry: Arc<Registry>,
    scheduler: Scheduler,
    shut_down: AtomicBool,
}

impl NodeRuntime {
    /// Register content on `destination` and start the background loops.
    ///
    /// A failed initial registration is logged and retried by the refresh
    /// loop when enabled; it does not prevent the node from starting.
    pub fn start(settings: NodeSettings, destination: Arc<dyn Destination>) -> Result<Self> {
        let registry = Arc::new(Registry::new(
            destination.clone(),
            &settings.pages_root,
            &settings.files_root,
        ));

        if let Err(e) = registry.register_pages() {
            log_node_warn!("Initial page registration failed", error = e);
        }
        if let Err(e) = registry.register_files() {
            log_node_warn!("Initial file registration failed", error = e);
        }

        destination.set_link_established_callback(Arc::new(|link: &LinkInfo| {
            log_node_debug!("Link established", link = link.link_id);
        }));

        let work = Arc::new(NodeWork {
            destination: destination.clone(),
            registry: registry.clone(),
            app_data: settings.display_name.as_ref().map(|n| n.as_bytes().to_vec()),
        });
        let intervals = Intervals {
            announce: settings.announce_interval,
            page_refresh: settings.page_refresh_interval,
            file_refresh: settings.file_refresh_interval,
        };
        let scheduler = Scheduler::start(work, intervals)?;

        log_node_info!(
            "Node started",
            address = destination.hash(),
            pages = registry.served_pages().served.len(),
            files = registry.served_files().served.len()
        );

        Ok(Self {
            settings,
            destination,
            registry,
            scheduler,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Stop the loops, then close the destination. Safe to call repeatedly.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log_node_info!("Shutting down");

        self.scheduler.shutdown(self.settings.join_timeout);
        if let Err(e) = self.destination.close() {
            log_node_warn!("Failed to close destination", error = e);
        }
    }

    /// Rescan the pages root now
    pub fn register_pages(&self) -> Result<BindingDiff> {
        self.registry.register_pages()
    }

    /// Rescan the files root now
    pub fn register_files(&self) -> Result<BindingDiff> {
        self.registry.register_files()
    }

    pub fn settings(&self) -> &NodeSettings {
        &self.settings
    }

    pub fn destination_hash(&self) -> DestinationHash {
        self.destination.hash()
    }

    pub fn served_pages(&self) -> Arc<Catalog> {
        self.registry.served_pages()
    }

    pub fn served_files(&self) -> Arc<Catalog> {
        self.registry.served_files()
    }

    pub fn bindings(&self) -> Vec<String> {
        self.registry.bindings()
    }

    pub fn last_announce(&self) -> Option<Instant> {
        self.scheduler.last_announce()
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }
}

impl Drop for NodeRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
