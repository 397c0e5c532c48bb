//! # Collaborator Ports
//!
//! Narrow interfaces the node consumes from its subsystems. The node only
//! constructs, wires, starts and stops them; their internals live behind
//! these traits. Anything implementing a port can be injected through
//! [`crate::container::NodeOptions`].
//!
//! The node owns every instance. A subsystem holds `Arc<dyn Port>` clones
//! only of collaborators assembled before it; references that point back
//! up the assembly order (the API registry's pools and block reader) are
//! `Weak`, so dropping the node releases the whole graph.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::registry::{Subsystem, SubsystemError};

/// 32-byte node identity (Keccak-256 of the node's public key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self(Keccak256::digest(public_key).into())
    }

    /// First four bytes in hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl FromStr for NodeId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut out)?;
        Ok(Self(out))
    }
}

/// Transaction type tag used to route transactions to pools and apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxType(pub u16);

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Opaque transaction as seen by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub payload: Vec<u8>,
}

/// Block header as stored in the block store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: [u8; 32],
    pub proposer: NodeId,
    pub timestamp_ms: u64,
    pub tx_count: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(self.height.to_be_bytes());
        hasher.update(self.parent_hash);
        hasher.update(self.proposer.0);
        hasher.update(self.timestamp_ms.to_be_bytes());
        hasher.update(self.tx_count.to_be_bytes());
        hasher.finalize().into()
    }
}

/// Identity provider.
pub trait NodeKey: Send + Sync {
    fn node_id(&self) -> NodeId;

    fn public_key(&self) -> [u8; 32];
}

/// Networking service.
pub trait Network: Subsystem {
    /// Register a peer-facing protocol/API namespace.
    fn register_protocol(&self, name: &str);

    /// Currently connected peers.
    fn peers(&self) -> Vec<NodeId>;

    /// Send to every connected peer; returns how many were reached.
    fn send_all(&self, topic: &str, payload: &[u8]) -> Result<usize, SubsystemError>;
}

/// Message fan-out over the network.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, topic: &str, payload: &[u8]) -> Result<usize, SubsystemError>;
}

/// Read side of the chain.
pub trait BlockReader: Subsystem {
    fn head(&self) -> Result<Option<BlockHeader>, SubsystemError>;

    fn header(&self, height: u64) -> Result<Option<BlockHeader>, SubsystemError>;
}

/// Write side of the chain. Headers are validated by consensus, and the
/// block's transactions by their applications, before storage.
pub trait BlockWriter: Send + Sync {
    fn insert_block(
        &self,
        header: BlockHeader,
        txs: &[Transaction],
    ) -> Result<(), SubsystemError>;
}

/// Composed read/write facade.
pub trait BlockReadWriter: Send + Sync {
    fn head(&self) -> Result<Option<BlockHeader>, SubsystemError>;

    fn header(&self, height: u64) -> Result<Option<BlockHeader>, SubsystemError>;

    fn insert_block(
        &self,
        header: BlockHeader,
        txs: &[Transaction],
    ) -> Result<(), SubsystemError>;
}

/// Consensus engine.
pub trait Consensus: Subsystem {
    /// Algorithm name.
    fn algorithm(&self) -> &str;

    /// Validate `header` as the successor of `parent`.
    fn verify_header(
        &self,
        parent: Option<&BlockHeader>,
        header: &BlockHeader,
    ) -> Result<(), SubsystemError>;

    /// Build the next header on top of `parent`.
    fn prepare_header(
        &self,
        parent: Option<&BlockHeader>,
        tx_count: u32,
    ) -> Result<BlockHeader, SubsystemError>;
}

/// A single transaction pool.
pub trait TxPool: Send + Sync {
    fn add(&self, tx: Transaction) -> Result<(), SubsystemError>;

    /// Remove and return up to `max` transactions.
    fn take(&self, max: usize) -> Vec<Transaction>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of transaction pools keyed by transaction type.
pub trait TxPools: Subsystem {
    fn register(&self, tx_type: TxType, pool: Arc<dyn TxPool>);

    fn pool(&self, tx_type: TxType) -> Option<Arc<dyn TxPool>>;

    /// Validate and admit a transaction into the pool for its type.
    fn submit(&self, tx: Transaction) -> Result<(), SubsystemError>;

    /// Drain up to `max` transactions across all pools.
    fn take(&self, max: usize) -> Vec<Transaction>;

    fn pending(&self) -> usize;
}

/// Peer protocol negotiation and access control.
pub trait Handshake: Subsystem {
    fn is_permitted(&self, peer: &NodeId) -> bool;
}

/// Block synchronization.
pub trait Syncer: Subsystem {
    /// Highest height seen by the last sync round.
    fn synced_height(&self) -> u64;
}

/// Block production.
pub trait Packer: Subsystem {
    /// Blocks produced since start.
    fn produced(&self) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_hex_round_trip() {
        let id = NodeId::from_public_key(b"validator-1");
        let parsed: NodeId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 8);
        assert!("0xzz".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_header_hash_changes_with_height() {
        let header = BlockHeader {
            height: 1,
            parent_hash: [0u8; 32],
            proposer: NodeId([1u8; 32]),
            timestamp_ms: 10,
            tx_count: 0,
        };
        let mut next = header.clone();
        next.height = 2;
        assert_ne!(header.hash(), next.hash());
    }
}
