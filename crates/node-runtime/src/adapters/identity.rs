//! # Node Identity
//!
//! Ed25519 node key persisted as hex in `<keystore>/nodekey`. Read first;
//! generated and written only when the file does not exist yet.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use thiserror::Error;
use tracing::info;

use super::ports::{NodeId, NodeKey};

pub const NODE_KEY_FILE: &str = "nodekey";

/// Identity provider errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("node key I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("node key at {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// File-backed node identity.
pub struct FileNodeKey {
    signing_key: SigningKey,
    node_id: NodeId,
}

impl FileNodeKey {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let node_id = NodeId::from_public_key(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            node_id,
        }
    }

    /// Load the key from `keystore`, generating it on first use.
    pub fn load_or_generate(keystore: &Path) -> Result<Self, IdentityError> {
        let path = keystore.join(NODE_KEY_FILE);
        let io_error = |source| IdentityError::Io {
            path: path.clone(),
            source,
        };

        match fs::read_to_string(&path) {
            Ok(raw) => {
                let mut seed = [0u8; 32];
                hex::decode_to_slice(raw.trim(), &mut seed).map_err(|e| {
                    IdentityError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    }
                })?;
                let key = Self::from_seed(seed);
                info!(node_id = %key.node_id.short(), "Loaded node key");
                Ok(key)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(keystore).map_err(io_error)?;
                let seed: [u8; 32] = rand::random();
                fs::write(&path, hex::encode(seed)).map_err(io_error)?;
                restrict_permissions(&path).map_err(io_error)?;
                let key = Self::from_seed(seed);
                info!(node_id = %key.node_id.short(), path = %path.display(), "Generated node key");
                Ok(key)
            }
            Err(e) => Err(io_error(e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl NodeKey for FileNodeKey {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_reload_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = dir.path().join("keystore");

        let first = FileNodeKey::load_or_generate(&keystore).unwrap();
        assert!(keystore.join(NODE_KEY_FILE).exists());

        let second = FileNodeKey::load_or_generate(&keystore).unwrap();
        assert_eq!(first.node_id(), second.node_id());
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_corrupt_key_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(NODE_KEY_FILE), "not-hex").unwrap();

        let err = FileNodeKey::load_or_generate(dir.path()).err().unwrap();
        assert!(matches!(err, IdentityError::Corrupt { .. }));
    }

    #[test]
    fn test_node_id_derives_from_public_key() {
        let key = FileNodeKey::from_seed([7u8; 32]);
        assert_eq!(key.node_id(), NodeId::from_public_key(&key.public_key()));
    }
}
