//! Node identity and the addresses derived from it.
//!
//! The identity file holds exactly the 32-byte Ed25519 secret seed. It is
//! created on first run and reused on every run after that.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::{Result, TransportError};

/// File name of the persisted credential inside the identity directory
pub const IDENTITY_FILE: &str = "identity";

const SEED_LEN: usize = 32;
const HASH_LEN: usize = 16;
const NAME_HASH_LEN: usize = 10;

/// Truncated hash identifying a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityHash(pub [u8; HASH_LEN]);

impl IdentityHash {
    /// Lowercase hex without delimiters
    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.hex())
    }
}

/// Network address of a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DestinationHash(pub [u8; HASH_LEN]);

impl DestinationHash {
    /// Derive the address for `app_name.aspect...` owned by `identity`
    pub fn derive(identity: &Identity, app_name: &str, aspects: &[&str]) -> Self {
        let mut full_name = app_name.to_string();
        for aspect in aspects {
            full_name.push('.');
            full_name.push_str(aspect);
        }
        let name_hash = blake3::hash(full_name.as_bytes());

        let mut hasher = blake3::Hasher::new();
        hasher.update(&name_hash.as_bytes()[..NAME_HASH_LEN]);
        hasher.update(&identity.hash().0);
        Self(truncate(hasher.finalize().as_bytes()))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for DestinationHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.hex())
    }
}

/// Long-lived credential of this node
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        f.debug_struct("Identity").field("hash", &self.hash()).finish()
    }
}

impl Identity {
    /// Generate a fresh identity from the OS RNG
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; SEED_LEN]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Truncated BLAKE3 hash of the public key
    pub fn hash(&self) -> IdentityHash {
        let public = self.signing_key.verifying_key().to_bytes();
        IdentityHash(truncate(blake3::hash(&public).as_bytes()))
    }

    /// Load an identity file. A file of the wrong length is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let seed: [u8; SEED_LEN] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| TransportError::InvalidIdentity {
                    path: path.display().to_string(),
                    expected: SEED_LEN,
                    found: bytes.len(),
                })?;
        Ok(Self::from_seed(&seed))
    }

    /// Persist the seed, owner-only, via write-then-rename
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        {
            let mut options = fs::OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp_path)?;
            file.write_all(&self.signing_key.to_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Load `<dir>/identity` if present, else generate and persist one
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(IDENTITY_FILE);

        if path.is_file() {
            let identity = Self::from_file(&path)?;
            info!(path = %path.display(), hash = %identity.hash(), "Loaded identity");
            return Ok(identity);
        }

        let identity = Self::generate();
        identity.to_file(&path)?;
        info!(path = %path.display(), hash = %identity.hash(), "Created new identity");
        Ok(identity)
    }
}

fn truncate(bytes: &[u8; 32]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&bytes[..HASH_LEN]);
    out
}
