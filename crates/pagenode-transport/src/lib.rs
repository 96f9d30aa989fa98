//! # pagenode-transport
//!
//! The contract between the page-node runtime and the overlay network.
//!
//! The runtime never talks to the network directly. It binds responders to
//! virtual request paths on a [`Destination`] and asks it to announce; link
//! establishment, framing, encryption and delivery all live behind the trait.
//! [`LoopbackDestination`] is an in-process implementation for local use and
//! tests.

pub mod identity;
pub mod loopback;

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::sync::Arc;
use std::time::SystemTime;

pub use identity::{DestinationHash, Identity, IdentityHash};
pub use loopback::LoopbackDestination;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Destination is closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid identity file {path}: expected {expected} bytes, found {found}")]
    InvalidIdentity {
        path: String,
        expected: usize,
        found: usize,
    },
    #[error("Announce failed: {0}")]
    Announce(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Form fields submitted with a request
pub type RequestData = BTreeMap<String, String>;

/// Identifier of an established link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(pub [u8; 16]);

impl LinkId {
    /// Lowercase hex without delimiters
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.hex())
    }
}

/// An inbound request as delivered to a responder
#[derive(Debug, Clone)]
pub struct Request {
    /// Virtual path the request was addressed to
    pub path: String,
    pub data: Option<RequestData>,
    pub request_id: [u8; 16],
    pub link_id: Option<LinkId>,
    pub remote_identity: Option<IdentityHash>,
    pub requested_at: SystemTime,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            data: None,
            request_id: [0; 16],
            link_id: None,
            remote_identity: None,
            requested_at: SystemTime::now(),
        }
    }

    pub fn with_data(mut self, data: RequestData) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_link(mut self, link_id: LinkId) -> Self {
        self.link_id = Some(link_id);
        self
    }

    pub fn with_remote_identity(mut self, identity: IdentityHash) -> Self {
        self.remote_identity = Some(identity);
        self
    }
}

/// Metadata sent alongside a streamed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
}

/// What a responder hands back to the transport.
///
/// A `File` response transfers ownership of the open handle to the caller,
/// which streams it and closes it when the transfer ends or is aborted.
#[derive(Debug)]
pub enum Response {
    Bytes(Vec<u8>),
    File { file: File, metadata: FileMetadata },
}

impl Response {
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Response::Bytes(bytes) => Some(bytes),
            Response::File { .. } => None,
        }
    }

    /// Collapse either variant into bytes, reading a streamed file to the end
    pub fn into_bytes(self) -> std::io::Result<Vec<u8>> {
        match self {
            Response::Bytes(bytes) => Ok(bytes),
            Response::File { mut file, .. } => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

/// Function bound to a virtual path
pub type Responder = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

/// Information about a freshly established link
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub link_id: LinkId,
    pub remote_identity: Option<IdentityHash>,
}

pub type LinkCallback = Arc<dyn Fn(&LinkInfo) + Send + Sync>;

/// Who may invoke a bound responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPolicy {
    AllowAll,
    AllowNone,
    AllowList(Vec<IdentityHash>),
}

impl AccessPolicy {
    pub fn permits(&self, remote: Option<&IdentityHash>) -> bool {
        match self {
            AccessPolicy::AllowAll => true,
            AccessPolicy::AllowNone => false,
            AccessPolicy::AllowList(allowed) => remote.is_some_and(|r| allowed.contains(r)),
        }
    }
}

/// Per-binding transport options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Compress responses up to this many bytes
    pub auto_compress: Option<u64>,
}

/// An addressable endpoint on the overlay network
pub trait Destination: Send + Sync {
    /// Network address derived from identity and name
    fn hash(&self) -> DestinationHash;

    /// Bind `responder` to `path`, replacing any existing binding
    fn register_handler(
        &self,
        path: &str,
        responder: Responder,
        policy: AccessPolicy,
        options: HandlerOptions,
    ) -> Result<()>;

    /// Remove the binding for `path`. Returns whether one existed.
    fn deregister_handler(&self, path: &str) -> bool;

    /// Broadcast presence, with optional opaque app data
    fn announce(&self, app_data: Option<&[u8]>) -> Result<()>;

    fn set_link_established_callback(&self, callback: LinkCallback);

    fn close(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_policy() {
        let alice = IdentityHash([1; 16]);
        let bob = IdentityHash([2; 16]);

        assert!(AccessPolicy::AllowAll.permits(None));
        assert!(!AccessPolicy::AllowNone.permits(Some(&alice)));

        let list = AccessPolicy::AllowList(vec![alice]);
        assert!(list.permits(Some(&alice)));
        assert!(!list.permits(Some(&bob)));
        assert!(!list.permits(None));
    }

    #[test]
    fn test_response_into_bytes_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"streamed").unwrap();

        let response = Response::File {
            file: File::open(&path).unwrap(),
            metadata: FileMetadata {
                name: "f.txt".to_string(),
            },
        };
        assert!(response.as_bytes().is_none());
        assert_eq!(response.into_bytes().unwrap(), b"streamed");
    }

    #[test]
    fn test_link_id_hex() {
        let link = LinkId([0xab; 16]);
        assert_eq!(link.hex(), "ab".repeat(16));
        assert_eq!(link.to_string(), format!("<{}>", "ab".repeat(16)));
    }
}
