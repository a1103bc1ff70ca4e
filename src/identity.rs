//! Durable node identity.
//!
//! The signing keypair rides along in the bootstrap storage file as a
//! base64-encoded protobuf blob, so a node that acts as a bootstrap entry
//! point keeps the same `PeerId` across restarts. A node without a persisted
//! key simply mints a fresh identity on startup.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use libp2p::identity::Keypair;
use libp2p::PeerId;

use crate::config::{self, BootstrapInfo};
use crate::error::MeshError;

/// A signing keypair and its derived peer identifier. Immutable once loaded
/// for the life of the process.
#[derive(Clone)]
pub struct NodeIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl NodeIdentity {
    /// Mints a fresh Ed25519 identity.
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = PeerId::from(keypair.public());
        Self { keypair, peer_id }
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Serializes the keypair for the storage file.
    pub fn encode(&self) -> Result<String, MeshError> {
        let bytes = self
            .keypair
            .to_protobuf_encoding()
            .map_err(|e| MeshError::Identity(format!("failed to encode keypair: {e}")))?;
        Ok(BASE64.encode(bytes))
    }

    /// Restores an identity from its storage-file encoding. Corrupt key
    /// material is a hard error, not a silent fallback.
    pub fn decode(encoded: &str) -> Result<Self, MeshError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| MeshError::Identity(format!("corrupt key encoding: {e}")))?;
        let keypair = Keypair::from_protobuf_encoding(&bytes)
            .map_err(|e| MeshError::Identity(format!("corrupt key material: {e}")))?;
        Ok(Self::from_keypair(keypair))
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

/// Loads the persisted identity from the storage file. Returns `None` when
/// the file is absent or carries no key; the caller mints a fresh identity.
pub fn load(path: &Path) -> Result<Option<NodeIdentity>, MeshError> {
    let info = config::load_info(path)?;
    match info.private_key.as_deref() {
        None | Some("") => Ok(None),
        Some(encoded) => NodeIdentity::decode(encoded).map(Some),
    }
}

/// Persists the identity together with the node's currently observed
/// reachable addresses. The peer-curated `addresses` list in the existing
/// file is preserved verbatim; only the self-advertisement is refreshed.
pub fn save(
    path: &Path,
    identity: &NodeIdentity,
    self_addresses: &[String],
) -> Result<(), MeshError> {
    let existing = config::load_info(path)?;
    let info = BootstrapInfo {
        bootstrap_node_addresses: self_addresses.to_vec(),
        addresses: existing.addresses,
        private_key: Some(identity.encode()?),
        peer_id: Some(identity.peer_id().to_string()),
    };
    config::store_info(path, &info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_preserves_peer_id() {
        let identity = NodeIdentity::generate();
        let encoded = identity.encode().unwrap();
        let restored = NodeIdentity::decode(&encoded).unwrap();
        assert_eq!(identity.peer_id(), restored.peer_id());
    }

    #[test]
    fn load_absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn load_empty_key_field_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        config::store_info(
            &path,
            &BootstrapInfo {
                private_key: Some(String::new()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn corrupt_key_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        config::store_info(
            &path,
            &BootstrapInfo {
                private_key: Some("not base64 at all!!!".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(load(&path), Err(MeshError::Identity(_))));
    }

    #[test]
    fn save_then_load_restores_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        let identity = NodeIdentity::generate();
        save(&path, &identity, &["/ip4/1.2.3.4/tcp/4001".into()]).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(identity.peer_id(), loaded.peer_id());
    }

    #[test]
    fn save_preserves_peer_curated_addresses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        config::store_info(
            &path,
            &BootstrapInfo {
                addresses: vec!["/ip4/9.9.9.9/tcp/4001/p2p/QmPeer".into()],
                ..Default::default()
            },
        )
        .unwrap();

        let identity = NodeIdentity::generate();
        save(&path, &identity, &["/ip4/1.2.3.4/tcp/4001".into()]).unwrap();

        let info = config::load_info(&path).unwrap();
        assert_eq!(info.addresses, vec!["/ip4/9.9.9.9/tcp/4001/p2p/QmPeer".to_string()]);
        assert_eq!(
            info.bootstrap_node_addresses,
            vec!["/ip4/1.2.3.4/tcp/4001".to_string()]
        );
        assert_eq!(info.peer_id, Some(identity.peer_id().to_string()));
    }

    #[test]
    fn repeated_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bootstrap.json");
        let identity = NodeIdentity::generate();
        let addrs = vec!["/ip4/1.2.3.4/tcp/4001".to_string()];
        save(&path, &identity, &addrs).unwrap();
        let first = std::fs::read(&path).unwrap();
        save(&path, &identity, &addrs).unwrap();
        let second = std::fs::read(&path).unwrap();
        assert_eq!(first, second);
    }
}
