//! In-process destination.
//!
//! Holds bindings in memory and dispatches requests synchronously on the
//! caller's thread. Used by the `page-node` diagnostics commands and by tests;
//! a network transport implements [`Destination`] the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::debug;

use crate::{
    AccessPolicy, Destination, DestinationHash, HandlerOptions, Identity, LinkCallback, LinkInfo,
    Request, Responder, Response, Result, TransportError,
};

struct Binding {
    responder: Responder,
    policy: AccessPolicy,
    options: HandlerOptions,
}

pub struct LoopbackDestination {
    hash: DestinationHash,
    bindings: RwLock<HashMap<String, Binding>>,
    link_callback: RwLock<Option<LinkCallback>>,
    announce_count: AtomicU64,
    last_app_data: Mutex<Option<Vec<u8>>>,
    closed: AtomicBool,
}

impl LoopbackDestination {
    pub fn new(identity: &Identity, app_name: &str, aspects: &[&str]) -> Self {
        Self {
            hash: DestinationHash::derive(identity, app_name, aspects),
            bindings: RwLock::new(HashMap::new()),
            link_callback: RwLock::new(None),
            announce_count: AtomicU64::new(0),
            last_app_data: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Deliver a request to the responder bound at `request.path`.
    ///
    /// Returns None when nothing is bound there, the access policy refuses the
    /// remote identity, or the destination is closed.
    pub fn dispatch(&self, request: &Request) -> Option<Response> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        let responder = {
            let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
            let binding = bindings.get(&request.path)?;
            if !binding.policy.permits(request.remote_identity.as_ref()) {
                debug!(path = %request.path, "Request refused by access policy");
                return None;
            }
            binding.responder.clone()
        };

        // Responder runs without the map lock held
        Some(responder(request))
    }

    /// Simulate a remote peer establishing a link
    pub fn establish_link(&self, link: LinkInfo) {
        let callback = self
            .link_callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(&link);
        }
    }

    /// Currently bound paths, sorted
    pub fn registered_paths(&self) -> Vec<String> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = bindings.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn options_for(&self, path: &str) -> Option<HandlerOptions> {
        let bindings = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        bindings.get(path).map(|b| b.options)
    }

    pub fn announce_count(&self) -> u64 {
        self.announce_count.load(Ordering::Acquire)
    }

    pub fn last_app_data(&self) -> Option<Vec<u8>> {
        self.last_app_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Destination for LoopbackDestination {
    fn hash(&self) -> DestinationHash {
        self.hash
    }

    fn register_handler(
        &self,
        path: &str,
        responder: Responder,
        policy: AccessPolicy,
        options: HandlerOptions,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.insert(
            path.to_string(),
            Binding {
                responder,
                policy,
                options,
            },
        );
        Ok(())
    }

    fn deregister_handler(&self, path: &str) -> bool {
        let mut bindings = self.bindings.write().unwrap_or_else(PoisonError::into_inner);
        bindings.remove(path).is_some()
    }

    fn announce(&self, app_data: Option<&[u8]>) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        *self
            .last_app_data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = app_data.map(<[u8]>::to_vec);
        self.announce_count.fetch_add(1, Ordering::AcqRel);
        debug!(destination = %self.hash, "Announced");
        Ok(())
    }

    fn set_link_established_callback(&self, callback: LinkCallback) {
        *self
            .link_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdentityHash, LinkId};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn destination() -> LoopbackDestination {
        LoopbackDestination::new(&Identity::from_seed(&[1; 32]), "nomadnetwork", &["node"])
    }

    fn echo() -> Responder {
        Arc::new(|req: &Request| Response::Bytes(req.path.clone().into_bytes()))
    }

    #[test]
    fn test_dispatch_and_replace() {
        let dest = destination();
        dest.register_handler("/page/a.mu", echo(), AccessPolicy::AllowAll, Default::default())
            .unwrap();

        let resp = dest.dispatch(&Request::new("/page/a.mu")).unwrap();
        assert_eq!(resp.as_bytes(), Some(&b"/page/a.mu"[..]));
        assert!(dest.dispatch(&Request::new("/page/missing.mu")).is_none());

        let fixed: Responder = Arc::new(|_: &Request| Response::Bytes(b"fixed".to_vec()));
        dest.register_handler("/page/a.mu", fixed, AccessPolicy::AllowAll, Default::default())
            .unwrap();
        let resp = dest.dispatch(&Request::new("/page/a.mu")).unwrap();
        assert_eq!(resp.as_bytes(), Some(&b"fixed"[..]));
        assert_eq!(dest.registered_paths(), vec!["/page/a.mu".to_string()]);
    }

    #[test]
    fn test_deregister() {
        let dest = destination();
        dest.register_handler("/file/x", echo(), AccessPolicy::AllowAll, Default::default())
            .unwrap();
        assert!(dest.deregister_handler("/file/x"));
        assert!(!dest.deregister_handler("/file/x"));
        assert!(dest.dispatch(&Request::new("/file/x")).is_none());
    }

    #[test]
    fn test_policy_enforced_on_dispatch() {
        let dest = destination();
        let friend = IdentityHash([3; 16]);
        dest.register_handler(
            "/page/private.mu",
            echo(),
            AccessPolicy::AllowList(vec![friend]),
            Default::default(),
        )
        .unwrap();

        assert!(dest.dispatch(&Request::new("/page/private.mu")).is_none());
        assert!(dest
            .dispatch(&Request::new("/page/private.mu").with_remote_identity(friend))
            .is_some());
    }

    #[test]
    fn test_announce_records_app_data() {
        let dest = destination();
        dest.announce(Some(b"My Node")).unwrap();
        dest.announce(None).unwrap();
        assert_eq!(dest.announce_count(), 2);
        assert_eq!(dest.last_app_data(), None);
    }

    #[test]
    fn test_closed_destination_refuses_work() {
        let dest = destination();
        dest.register_handler("/page/a.mu", echo(), AccessPolicy::AllowAll, Default::default())
            .unwrap();
        dest.close().unwrap();

        assert!(dest.dispatch(&Request::new("/page/a.mu")).is_none());
        assert!(matches!(dest.announce(None), Err(TransportError::Closed)));
        assert!(matches!(
            dest.register_handler("/page/b.mu", echo(), AccessPolicy::AllowAll, Default::default()),
            Err(TransportError::Closed)
        ));
    }

    #[test]
    fn test_link_callback_fires() {
        let dest = destination();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        dest.set_link_established_callback(Arc::new(move |_link: &LinkInfo| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        }));

        dest.establish_link(LinkInfo {
            link_id: LinkId([5; 16]),
            remote_identity: None,
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
