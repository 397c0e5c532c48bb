//! # Node Configuration
//!
//! Unified configuration for the node and the subsystems it assembles.
//!
//! The file format is TOML; every section is optional and falls back to the
//! defaults documented on each field. Configuration is immutable once the
//! node has been constructed (it is shared as `Arc<NodeConfig>`).
//!
//! ## Directory Layout
//!
//! ```text
//! <data_dir>/
//! ├── conf/          configuration files
//! ├── chaindata/     state, block and CRUD stores (default storage base path)
//! ├── p2p/           peer-to-peer state
//! ├── keystore/      node identity
//! ├── certs/         TLS certificates
//! └── ledger.ipc     IPC endpoint
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapters::storage::KvStore;
use crate::error::{BoxError, ConfigError};

pub const CONF_DIR: &str = "conf";
pub const CHAIN_DATA_DIR: &str = "chaindata";
pub const P2P_DIR: &str = "p2p";
pub const KEYSTORE_DIR: &str = "keystore";
pub const CERTS_DIR: &str = "certs";
pub const IPC_FILE: &str = "ledger.ipc";

/// State-store key under which the chain section is persisted.
pub const CHAIN_CONFIG_KEY: &[u8] = b"config/chain";

/// Complete node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all node data.
    pub data_dir: PathBuf,
    /// Storage driver configuration.
    pub database: DatabaseConfig,
    /// Chain parameters (persisted on first run).
    pub chain: ChainConfig,
    /// Network configuration.
    pub network: NetworkConfig,
    /// Peer permission configuration.
    pub permission: PermissionConfig,
    /// Block production configuration.
    pub packer: PackerConfig,
    /// Block synchronization configuration.
    pub syncer: SyncerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database: DatabaseConfig::default(),
            chain: ChainConfig::default(),
            network: NetworkConfig::default(),
            permission: PermissionConfig::default(),
            packer: PackerConfig::default(),
            syncer: SyncerConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Single-node development profile: in-memory storage, solo consensus.
    pub fn dev(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            chain: ChainConfig {
                chain_id: 1337,
                consensus: Some(ConsensusConfig::default()),
            },
            network: NetworkConfig {
                listen_addr: "127.0.0.1:0".to_string(),
                ..NetworkConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = parse_file(path)?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Validate field values that do not depend on any subsystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "data_dir",
                reason: "must not be empty".to_string(),
            });
        }
        if self.database.driver.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "database.driver",
                reason: "must not be empty".to_string(),
            });
        }
        if self.chain.chain_id == 0 {
            return Err(ConfigError::Invalid {
                field: "chain.chain_id",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.network.max_peers == 0 {
            return Err(ConfigError::Invalid {
                field: "network.max_peers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.packer.max_txs_per_block == 0 {
            return Err(ConfigError::Invalid {
                field: "packer.max_txs_per_block",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Whether block production is enabled (`--mine`).
    pub fn enable_packer(&self) -> bool {
        self.packer.enabled
    }

    /// Directory layout rooted at `data_dir`.
    pub fn layout(&self) -> DataDir {
        DataDir::from_root(&self.data_dir)
    }

    /// Base path for the named stores.
    pub fn storage_path(&self) -> PathBuf {
        self.database
            .source
            .clone()
            .unwrap_or_else(|| self.layout().chain_data)
    }

    /// Reconcile the chain section with the copy persisted in the state store.
    ///
    /// The first run persists the file's chain section; later runs keep the
    /// persisted one, since genesis parameters cannot change under a live chain.
    pub fn bind_storage(mut self, state: &dyn KvStore) -> Result<Self, BoxError> {
        if let Some(stored) = self.seed_storage(state)? {
            if stored != self.chain {
                warn!(
                    stored_chain_id = stored.chain_id,
                    file_chain_id = self.chain.chain_id,
                    "Chain config differs from stored copy, keeping stored"
                );
                self.chain = stored;
            }
        }
        Ok(self)
    }

    /// Persist the chain section if the state store holds none yet.
    ///
    /// Returns the previously stored section, leaving `self` and the store
    /// untouched in that case.
    pub fn seed_storage(&self, state: &dyn KvStore) -> Result<Option<ChainConfig>, BoxError> {
        match state.get(CHAIN_CONFIG_KEY)? {
            Some(raw) => {
                let stored: ChainConfig = serde_json::from_slice(&raw)
                    .map_err(|e| ConfigError::StoredChain(e.to_string()))?;
                Ok(Some(stored))
            }
            None => {
                let raw = serde_json::to_vec(&self.chain)
                    .map_err(|e| ConfigError::StoredChain(e.to_string()))?;
                state.put(CHAIN_CONFIG_KEY, &raw)?;
                debug!(chain_id = self.chain.chain_id, "Chain config persisted");
                Ok(None)
            }
        }
    }
}

fn parse_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Named node directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    pub root: PathBuf,
    pub conf: PathBuf,
    pub chain_data: PathBuf,
    pub p2p: PathBuf,
    pub keystore: PathBuf,
    pub certs: PathBuf,
    pub ipc_path: PathBuf,
}

impl DataDir {
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            root: root.to_path_buf(),
            conf: root.join(CONF_DIR),
            chain_data: root.join(CHAIN_DATA_DIR),
            p2p: root.join(P2P_DIR),
            keystore: root.join(KEYSTORE_DIR),
            certs: root.join(CERTS_DIR),
            ipc_path: root.join(IPC_FILE),
        }
    }

    /// Create every directory that does not exist yet.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            &self.conf,
            &self.chain_data,
            &self.p2p,
            &self.keystore,
            &self.certs,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Storage driver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Driver name: "memory", or "leveldb"/"rocksdb" with the `rocksdb` feature.
    pub driver: String,
    /// Base path for the stores. Defaults to `<data_dir>/chaindata`.
    pub source: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            source: None,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DatabaseOnly {
    data_dir: Option<PathBuf>,
    database: DatabaseConfig,
}

impl DatabaseConfig {
    /// Read only the `[database]` section (and `data_dir`) of a config file.
    ///
    /// Storage opens before the full configuration is built, so this runs
    /// ahead of [`NodeConfig::load`]. Returns the section and its base path.
    pub fn load(path: &Path) -> Result<(Self, PathBuf), ConfigError> {
        let section: DatabaseOnly = parse_file(path)?;
        let data_dir = section
            .data_dir
            .unwrap_or_else(|| NodeConfig::default().data_dir);
        let base = section
            .database
            .source
            .clone()
            .unwrap_or_else(|| DataDir::from_root(&data_dir).chain_data);
        Ok((section.database, base))
    }
}

/// Chain parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain ID.
    pub chain_id: u64,
    /// Consensus declaration. Required before late binding.
    pub consensus: Option<ConsensusConfig>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            consensus: None,
        }
    }
}

impl ChainConfig {
    /// Resolve the declared consensus algorithm.
    pub fn consensus_algorithm(&self) -> Result<ConsensusAlgorithm, ConfigError> {
        let declared = self
            .consensus
            .as_ref()
            .map(|c| c.name.trim())
            .filter(|name| !name.is_empty())
            .ok_or(ConfigError::MissingConsensus)?;
        ConsensusAlgorithm::parse(declared)
    }
}

/// Consensus declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Algorithm name ("solo" or "authority").
    pub name: String,
    /// Hex node IDs allowed to propose (authority only).
    pub validators: Vec<String>,
    /// Target block interval in milliseconds.
    pub block_interval_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            name: "solo".to_string(),
            validators: Vec::new(),
            block_interval_ms: 1000,
        }
    }
}

/// Consensus algorithms the node knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusAlgorithm {
    /// Single proposer, headers only need to extend the head.
    Solo,
    /// Fixed validator set, proposer must be a member.
    Authority,
}

impl ConsensusAlgorithm {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.to_ascii_lowercase().as_str() {
            "solo" => Ok(Self::Solo),
            "authority" | "poa" => Ok(Self::Authority),
            _ => Err(ConfigError::UnsupportedConsensus(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Authority => "authority",
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// P2P listen address.
    pub listen_addr: String,
    /// Maximum connected peers.
    pub max_peers: usize,
    /// Bootstrap node addresses.
    pub boot_nodes: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:30303".to_string(),
            max_peers: 50,
            boot_nodes: Vec::new(),
        }
    }
}

/// Peer permission configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Hex node IDs allowed to connect. Empty means open membership.
    pub allowed_peers: Vec<String>,
}

/// Block production configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackerConfig {
    /// Enable block production.
    pub enabled: bool,
    /// Maximum transactions drained into one block.
    pub max_txs_per_block: usize,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_txs_per_block: 500,
        }
    }
}

/// Block synchronization configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncerConfig {
    /// Interval between peer head polls in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.database.driver, "memory");
        assert_eq!(config.network.max_peers, 50);
        assert!(!config.enable_packer());
        assert!(config.chain.consensus.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_layout_and_storage_path() {
        let mut config = NodeConfig::dev("/var/ledger");
        let layout = config.layout();
        assert_eq!(layout.keystore, PathBuf::from("/var/ledger/keystore"));
        assert_eq!(layout.ipc_path, PathBuf::from("/var/ledger/ledger.ipc"));
        assert_eq!(config.storage_path(), PathBuf::from("/var/ledger/chaindata"));

        config.database.source = Some(PathBuf::from("/mnt/db"));
        assert_eq!(config.storage_path(), PathBuf::from("/mnt/db"));
    }

    #[test]
    fn test_consensus_algorithm_resolution() {
        let mut chain = ChainConfig::default();
        assert!(matches!(
            chain.consensus_algorithm(),
            Err(ConfigError::MissingConsensus)
        ));

        chain.consensus = Some(ConsensusConfig {
            name: "  ".to_string(),
            ..ConsensusConfig::default()
        });
        assert!(matches!(
            chain.consensus_algorithm(),
            Err(ConfigError::MissingConsensus)
        ));

        chain.consensus = Some(ConsensusConfig {
            name: "pow".to_string(),
            ..ConsensusConfig::default()
        });
        assert!(matches!(
            chain.consensus_algorithm(),
            Err(ConfigError::UnsupportedConsensus(name)) if name == "pow"
        ));

        chain.consensus = Some(ConsensusConfig::default());
        assert_eq!(chain.consensus_algorithm().unwrap(), ConsensusAlgorithm::Solo);
    }

    #[test]
    fn test_validate_rejects_zero_chain_id() {
        let mut config = NodeConfig::default();
        config.chain.chain_id = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "chain.chain_id", .. })
        ));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        fs::write(
            &path,
            r#"
data_dir = "/srv/node"

[database]
driver = "leveldb"

[chain]
chain_id = 7

[chain.consensus]
name = "authority"
validators = ["aa"]

[packer]
enabled = true
"#,
        )
        .unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.chain.chain_id, 7);
        assert_eq!(
            config.chain.consensus_algorithm().unwrap(),
            ConsensusAlgorithm::Authority
        );
        assert!(config.enable_packer());
        assert_eq!(config.network.max_peers, 50);

        let (database, base) = DatabaseConfig::load(&path).unwrap();
        assert_eq!(database.driver, "leveldb");
        assert_eq!(base, PathBuf::from("/srv/node/chaindata"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = NodeConfig::load(Path::new("/nonexistent/node.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_bind_storage_persists_then_keeps_stored_chain() {
        let store = MemoryStore::new("statedata");

        let first = NodeConfig::dev("/tmp/a").bind_storage(&store).unwrap();
        assert_eq!(first.chain.chain_id, 1337);
        assert!(store.get(CHAIN_CONFIG_KEY).unwrap().is_some());

        let mut changed = NodeConfig::dev("/tmp/a");
        changed.chain.chain_id = 99;
        let second = changed.bind_storage(&store).unwrap();
        assert_eq!(second.chain.chain_id, 1337);
    }

    #[test]
    fn test_seed_storage_never_rewrites_stored_chain() {
        let store = MemoryStore::new("statedata");
        let mut config = NodeConfig::dev("/tmp/a");

        assert_eq!(config.seed_storage(&store).unwrap(), None);
        let persisted = store.get(CHAIN_CONFIG_KEY).unwrap();

        config.chain.chain_id = 5;
        let stored = config.seed_storage(&store).unwrap().unwrap();
        assert_eq!(stored.chain_id, 1337);
        assert_eq!(config.chain.chain_id, 5);
        assert_eq!(store.get(CHAIN_CONFIG_KEY).unwrap(), persisted);
    }
}
