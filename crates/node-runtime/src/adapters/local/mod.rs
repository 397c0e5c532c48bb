//! # Built-in Collaborators
//!
//! Single-process implementations of every collaborator port. The node falls
//! back to these for any slot not supplied through
//! [`crate::container::NodeOptions`].

pub mod chain;
pub mod consensus;
pub mod network;
pub mod txpool;
pub mod workers;

pub use chain::{genesis_header, LocalBlockReadWriter, LocalBlockReader, LocalBlockWriter};
pub use consensus::LocalConsensus;
pub use network::{LocalBroadcaster, LocalHandshake, LocalNetwork};
pub use txpool::{LocalTxPools, MemoryTxPool, DEFAULT_POOL_CAPACITY};
pub use workers::{LocalPacker, LocalSyncer};
