//! Bootstrap address registry.
//!
//! A small, file-backed list of known mesh entry points with add/remove/list
//! and exact-string deduplication. Every mutation is a read-modify-write over
//! the whole storage file, serialized through an in-process lock; the file is
//! not safe for concurrent multi-process mutation (single-node assumption).

use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::{self, BootstrapInfo};
use crate::error::MeshError;

/// Multiaddr components an address string may legitimately start with.
/// Anything before the first of these is treated as an accidental
/// filesystem-path prefix (e.g. a shell completion artifact) and stripped.
const ADDRESS_MARKERS: &[&str] = &["/ip4/", "/ip6/", "/dns/", "/dns4/", "/dns6/", "/dnsaddr/"];

/// Strips an accidental path prefix so the string begins at the actual
/// multiaddr. Input sanitization applied before `add`, not part of the
/// registry's own contract.
pub fn sanitize_address(input: &str) -> String {
    let trimmed = input.trim();
    ADDRESS_MARKERS
        .iter()
        .filter_map(|marker| trimmed.find(marker))
        .min()
        .map(|start| trimmed[start..].to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub struct BootstrapRegistry {
    path: PathBuf,
    lock: Mutex<()>,
}

impl BootstrapRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    /// Registry backed by the default storage file under the home directory.
    pub fn open_default() -> Result<Self, MeshError> {
        Ok(Self::new(config::bootstrap_file_path()?))
    }

    /// The user-curated bootstrap addresses, in insertion order.
    pub fn list(&self) -> Result<Vec<String>, MeshError> {
        let _guard = self.guard();
        Ok(config::load_info(&self.path)?.addresses)
    }

    /// Appends an address. Exact-string duplicates are rejected.
    pub fn add(&self, address: &str) -> Result<(), MeshError> {
        let _guard = self.guard();
        let mut info = config::load_info(&self.path)?;
        if info.addresses.iter().any(|existing| existing == address) {
            return Err(MeshError::AlreadyExists(address.to_string()));
        }
        info.addresses.push(address.to_string());
        config::store_info(&self.path, &info)
    }

    /// Removes an address, preserving the order of the remaining entries.
    pub fn remove(&self, address: &str) -> Result<(), MeshError> {
        let _guard = self.guard();
        let mut info = config::load_info(&self.path)?;
        let before = info.addresses.len();
        info.addresses.retain(|existing| existing != address);
        if info.addresses.len() == before {
            return Err(MeshError::NotFound(address.to_string()));
        }
        config::store_info(&self.path, &info)
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
