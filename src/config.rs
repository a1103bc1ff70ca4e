//! Storage file handling for the node's configuration directory.
//!
//! One JSON file per node, `~/.meshtalk/bootstrap.json`, holding the node's
//! own advertised addresses, the user-curated list of bootstrap entry points,
//! and (for nodes that act as bootstrap entry points) the serialized identity
//! key. Every mutation is a whole-file read-modify-write; the write goes to a
//! temp file first and is renamed over the target so readers never observe a
//! partial file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

pub const CONFIG_DIR_NAME: &str = ".meshtalk";
pub const BOOTSTRAP_FILE_NAME: &str = "bootstrap.json";

/// Contents of the storage file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapInfo {
    /// This node's own advertised addresses, refreshed on each save.
    #[serde(default)]
    pub bootstrap_node_addresses: Vec<String>,
    /// User-curated bootstrap entry points, deduplicated, order preserved.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Base64-encoded protobuf keypair. Present only on bootstrap nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

/// Path of the configuration directory under the user's home.
pub fn config_dir() -> Result<PathBuf, MeshError> {
    let home = dirs::home_dir()
        .ok_or_else(|| MeshError::Config("could not determine home directory".into()))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Path of the storage file.
pub fn bootstrap_file_path() -> Result<PathBuf, MeshError> {
    Ok(config_dir()?.join(BOOTSTRAP_FILE_NAME))
}

/// Reads the storage file, returning an empty default when it does not exist.
pub fn load_info(path: &Path) -> Result<BootstrapInfo, MeshError> {
    if !path.exists() {
        return Ok(BootstrapInfo::default());
    }
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Rewrites the whole storage file atomically (temp file + rename).
pub fn store_info(path: &Path, info: &BootstrapInfo) -> Result<(), MeshError> {
    let dir = path
        .parent()
        .ok_or_else(|| MeshError::Config(format!("no parent directory for {}", path.display())))?;
    ensure_dir(dir)?;

    let mut data = serde_json::to_vec_pretty(info)?;
    data.push(b'\n');

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Removes the whole configuration directory. Missing directory is a no-op.
pub fn wipe_dir(dir: &Path) -> Result<(), MeshError> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), MeshError> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_in_tempdir(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(CONFIG_DIR_NAME).join(BOOTSTRAP_FILE_NAME)
    }

    #[test]
    fn absent_file_loads_as_empty_default() {
        let dir = tempfile::tempdir().unwrap();
        let info = load_info(&file_in_tempdir(&dir)).unwrap();
        assert_eq!(info, BootstrapInfo::default());
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_in_tempdir(&dir);
        let info = BootstrapInfo {
            bootstrap_node_addresses: vec!["/ip4/1.2.3.4/tcp/4001/p2p/QmSelf".into()],
            addresses: vec!["/ip4/5.6.7.8/tcp/4001/p2p/QmPeer".into()],
            private_key: Some("c2VjcmV0".into()),
            peer_id: Some("QmSelf".into()),
        };
        store_info(&path, &info).unwrap();
        assert_eq!(load_info(&path).unwrap(), info);
    }

    #[test]
    fn repeated_store_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_in_tempdir(&dir);
        let info = BootstrapInfo {
            bootstrap_node_addresses: vec!["/ip4/1.2.3.4/tcp/4001/p2p/QmSelf".into()],
            addresses: vec!["/ip4/5.6.7.8/tcp/4001/p2p/QmPeer".into()],
            private_key: None,
            peer_id: None,
        };
        store_info(&path, &info).unwrap();
        let first = fs::read(&path).unwrap();
        store_info(&path, &info).unwrap();
        let second = fs::read(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_in_tempdir(&dir);
        store_info(&path, &BootstrapInfo::default()).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_optional_fields_deserialize() {
        let info: BootstrapInfo = serde_json::from_str(r#"{"addresses":["/ip4/1.1.1.1/tcp/1"]}"#).unwrap();
        assert_eq!(info.addresses.len(), 1);
        assert!(info.private_key.is_none());
        assert!(info.bootstrap_node_addresses.is_empty());
    }

    #[test]
    fn wipe_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = file_in_tempdir(&dir);
        store_info(&path, &BootstrapInfo::default()).unwrap();
        let config = path.parent().unwrap().to_path_buf();
        wipe_dir(&config).unwrap();
        assert!(!config.exists());
        // Wiping again is fine.
        wipe_dir(&config).unwrap();
    }
}
