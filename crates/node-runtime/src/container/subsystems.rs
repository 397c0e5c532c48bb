//! # Subsystem Container
//!
//! Nullable slots for every collaborator the node owns. A slot is filled
//! either by an override (see [`super::options`]) or by the assembler.
//!
//! ## Ownership
//!
//! - The node owns the container; subsystems only hold `Arc` clones of the
//!   collaborators they were built from.
//! - Store handles are taken out of the container exactly once, on teardown.

use std::sync::Arc;

use crate::adapters::dispatch::{ApiRegistry, Apps};
use crate::adapters::ports::{
    BlockReadWriter, BlockReader, BlockWriter, Broadcaster, Consensus, Handshake, Network,
    NodeKey, Packer, Syncer, TxPools,
};
use crate::adapters::storage::{StorageDriver, Stores};
use crate::container::config::NodeConfig;
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

/// Every slot the assembler fills, in assembly order.
#[derive(Default)]
pub struct Components {
    pub config: Option<Arc<NodeConfig>>,
    pub node_key: Option<Arc<dyn NodeKey>>,
    pub storage_driver: Option<Arc<dyn StorageDriver>>,
    pub stores: Option<Stores>,
    pub apps: Option<Arc<Apps>>,
    pub apis: Option<Arc<ApiRegistry>>,
    pub network: Option<Arc<dyn Network>>,
    pub broadcaster: Option<Arc<dyn Broadcaster>>,
    pub block_reader: Option<Arc<dyn BlockReader>>,
    pub tx_pools: Option<Arc<dyn TxPools>>,
    pub consensus: Option<Arc<dyn Consensus>>,
    pub block_writer: Option<Arc<dyn BlockWriter>>,
    pub block_read_writer: Option<Arc<dyn BlockReadWriter>>,
    pub handshake: Option<Arc<dyn Handshake>>,
    pub syncer: Option<Arc<dyn Syncer>>,
    pub packer: Option<Arc<dyn Packer>>,
}

/// Call a lifecycle method on the slot for `$id`.
///
/// Evaluates to `None` when the slot is empty or the id has no lifecycle.
macro_rules! lifecycle_call {
    (@slot $slot:expr, $method:ident) => {
        match &$slot {
            Some(subsystem) => Some(subsystem.$method().await),
            None => None,
        }
    };
    ($components:expr, $id:expr, $method:ident) => {
        match $id {
            SubsystemId::BlockReader => lifecycle_call!(@slot $components.block_reader, $method),
            SubsystemId::Network => lifecycle_call!(@slot $components.network, $method),
            SubsystemId::TxPools => lifecycle_call!(@slot $components.tx_pools, $method),
            SubsystemId::Handshake => lifecycle_call!(@slot $components.handshake, $method),
            SubsystemId::Consensus => lifecycle_call!(@slot $components.consensus, $method),
            SubsystemId::Syncer => lifecycle_call!(@slot $components.syncer, $method),
            SubsystemId::Packer => lifecycle_call!(@slot $components.packer, $method),
            SubsystemId::Broadcaster | SubsystemId::BlockWriter => None,
        }
    };
}

impl Components {
    /// Whether the slot for `id` holds an instance.
    pub fn is_assembled(&self, id: SubsystemId) -> bool {
        match id {
            SubsystemId::BlockReader => self.block_reader.is_some(),
            SubsystemId::Network => self.network.is_some(),
            SubsystemId::TxPools => self.tx_pools.is_some(),
            SubsystemId::Handshake => self.handshake.is_some(),
            SubsystemId::Consensus => self.consensus.is_some(),
            SubsystemId::Syncer => self.syncer.is_some(),
            SubsystemId::Packer => self.packer.is_some(),
            SubsystemId::Broadcaster => self.broadcaster.is_some(),
            SubsystemId::BlockWriter => self.block_writer.is_some(),
        }
    }

    /// Start the subsystem in slot `id`; `None` if the slot is empty.
    pub async fn start(&self, id: SubsystemId) -> Option<Result<(), SubsystemError>> {
        lifecycle_call!(self, id, start)
    }

    /// Stop the subsystem in slot `id`; `None` if the slot is empty.
    pub async fn stop(&self, id: SubsystemId) -> Option<Result<(), SubsystemError>> {
        lifecycle_call!(self, id, stop)
    }
}
