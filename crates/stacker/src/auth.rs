//! File-access token seam.
//!
//! When `LookupVolume` resolves a full file id, the response carries a
//! signed token the client presents to the volume server. Real signing
//! belongs to the security module; the master only needs something that
//! turns a file id into a token. Deployments without a signing key run
//! open, with empty tokens.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub trait TokenSigner: Send + Sync + 'static {
    /// Token for one file id; empty means "no auth required".
    fn sign(&self, file_id: &str) -> String;
}

/// Open cluster: no tokens at all.
pub struct NoAuth;

impl TokenSigner for NoAuth {
    fn sign(&self, _file_id: &str) -> String {
        String::new()
    }
}

/// Keyed stand-in signer. Produces a stable opaque token bound to the
/// key and the file id; the security module's signer replaces this in
/// deployments that need verifiable tokens.
pub struct KeyedSigner {
    key: String,
}

impl KeyedSigner {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl TokenSigner for KeyedSigner {
    fn sign(&self, file_id: &str) -> String {
        if self.key.is_empty() {
            return String::new();
        }
        let mut hasher = DefaultHasher::new();
        self.key.hash(&mut hasher);
        file_id.hash(&mut hasher);
        format!("hs1.{:016x}", hasher.finish())
    }
}
