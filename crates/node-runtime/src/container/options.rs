//! # Option Injector
//!
//! Ordered overrides applied to an empty [`Components`] before assembly.
//! Each override fills exactly one slot; a later override for the same slot
//! replaces an earlier one. Slots left empty are filled by the assembler.
//!
//! ```ignore
//! let options = NodeOptions::new()
//!     .with_storage_driver(Arc::new(MemoryDriver))
//!     .with_consensus(my_engine);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::adapters::dispatch::{ApiRegistry, Apps};
use crate::adapters::ports::{
    BlockReadWriter, BlockReader, BlockWriter, Broadcaster, Consensus, Handshake, Network,
    NodeKey, Packer, Syncer, TxPools,
};
use crate::adapters::storage::StorageDriver;
use crate::container::config::NodeConfig;
use crate::container::subsystems::Components;
use crate::error::{ConfigError, NodeError};

/// A single override.
pub enum NodeOption {
    Config(NodeConfig),
    NodeKey(Arc<dyn NodeKey>),
    StorageDriver(Arc<dyn StorageDriver>),
    Apps(Arc<Apps>),
    Apis(Arc<ApiRegistry>),
    Network(Arc<dyn Network>),
    Broadcaster(Arc<dyn Broadcaster>),
    BlockReader(Arc<dyn BlockReader>),
    TxPools(Arc<dyn TxPools>),
    Consensus(Arc<dyn Consensus>),
    BlockWriter(Arc<dyn BlockWriter>),
    BlockReadWriter(Arc<dyn BlockReadWriter>),
    Handshake(Arc<dyn Handshake>),
    Syncer(Arc<dyn Syncer>),
    Packer(Arc<dyn Packer>),
}

impl NodeOption {
    /// Name reported when the override is rejected.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::NodeKey(_) => "node_key",
            Self::StorageDriver(_) => "storage_driver",
            Self::Apps(_) => "apps",
            Self::Apis(_) => "apis",
            Self::Network(_) => "network",
            Self::Broadcaster(_) => "broadcaster",
            Self::BlockReader(_) => "block_reader",
            Self::TxPools(_) => "tx_pools",
            Self::Consensus(_) => "consensus",
            Self::BlockWriter(_) => "block_writer",
            Self::BlockReadWriter(_) => "block_read_writer",
            Self::Handshake(_) => "handshake",
            Self::Syncer(_) => "syncer",
            Self::Packer(_) => "packer",
        }
    }

    fn apply(self, components: &mut Components) -> Result<(), ConfigError> {
        match self {
            Self::Config(config) => {
                config.validate()?;
                components.config = Some(Arc::new(config));
            }
            Self::NodeKey(key) => components.node_key = Some(key),
            Self::StorageDriver(driver) => {
                if driver.name().trim().is_empty() {
                    return Err(ConfigError::Invalid {
                        field: "storage_driver",
                        reason: "driver name must not be empty".to_string(),
                    });
                }
                components.storage_driver = Some(driver);
            }
            Self::Apps(apps) => components.apps = Some(apps),
            Self::Apis(apis) => components.apis = Some(apis),
            Self::Network(network) => components.network = Some(network),
            Self::Broadcaster(broadcaster) => components.broadcaster = Some(broadcaster),
            Self::BlockReader(reader) => components.block_reader = Some(reader),
            Self::TxPools(pools) => components.tx_pools = Some(pools),
            Self::Consensus(consensus) => components.consensus = Some(consensus),
            Self::BlockWriter(writer) => components.block_writer = Some(writer),
            Self::BlockReadWriter(rw) => components.block_read_writer = Some(rw),
            Self::Handshake(handshake) => components.handshake = Some(handshake),
            Self::Syncer(syncer) => components.syncer = Some(syncer),
            Self::Packer(packer) => components.packer = Some(packer),
        }
        Ok(())
    }
}

impl fmt::Debug for NodeOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeOption::{}", self.name())
    }
}

/// Ordered override sequence.
#[derive(Debug, Default)]
pub struct NodeOptions {
    overrides: Vec<NodeOption>,
}

impl NodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an override.
    pub fn with(mut self, option: NodeOption) -> Self {
        self.overrides.push(option);
        self
    }

    pub fn with_config(self, config: NodeConfig) -> Self {
        self.with(NodeOption::Config(config))
    }

    pub fn with_node_key(self, key: Arc<dyn NodeKey>) -> Self {
        self.with(NodeOption::NodeKey(key))
    }

    pub fn with_storage_driver(self, driver: Arc<dyn StorageDriver>) -> Self {
        self.with(NodeOption::StorageDriver(driver))
    }

    pub fn with_apps(self, apps: Arc<Apps>) -> Self {
        self.with(NodeOption::Apps(apps))
    }

    pub fn with_apis(self, apis: Arc<ApiRegistry>) -> Self {
        self.with(NodeOption::Apis(apis))
    }

    pub fn with_network(self, network: Arc<dyn Network>) -> Self {
        self.with(NodeOption::Network(network))
    }

    pub fn with_broadcaster(self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.with(NodeOption::Broadcaster(broadcaster))
    }

    pub fn with_block_reader(self, reader: Arc<dyn BlockReader>) -> Self {
        self.with(NodeOption::BlockReader(reader))
    }

    pub fn with_tx_pools(self, pools: Arc<dyn TxPools>) -> Self {
        self.with(NodeOption::TxPools(pools))
    }

    pub fn with_consensus(self, consensus: Arc<dyn Consensus>) -> Self {
        self.with(NodeOption::Consensus(consensus))
    }

    pub fn with_block_writer(self, writer: Arc<dyn BlockWriter>) -> Self {
        self.with(NodeOption::BlockWriter(writer))
    }

    pub fn with_block_read_writer(self, rw: Arc<dyn BlockReadWriter>) -> Self {
        self.with(NodeOption::BlockReadWriter(rw))
    }

    pub fn with_handshake(self, handshake: Arc<dyn Handshake>) -> Self {
        self.with(NodeOption::Handshake(handshake))
    }

    pub fn with_syncer(self, syncer: Arc<dyn Syncer>) -> Self {
        self.with(NodeOption::Syncer(syncer))
    }

    pub fn with_packer(self, packer: Arc<dyn Packer>) -> Self {
        self.with(NodeOption::Packer(packer))
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Apply every override in order. Stops at the first rejected one.
    pub fn apply(self, components: &mut Components) -> Result<(), NodeError> {
        for option in self.overrides {
            let name = option.name();
            option
                .apply(components)
                .map_err(|source| NodeError::Option {
                    option: name,
                    source,
                })?;
        }
        Ok(())
    }
}
