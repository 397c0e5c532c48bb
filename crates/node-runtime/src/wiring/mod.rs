//! # Subsystem Wiring
//!
//! Phased construction of the node's collaborators.
//!
//! ```text
//! Bootstrap      Config → Identity
//!
//! Full Assembly  Storage → Config → Identity → Apps → APIs → Network
//!                → Broadcaster → BlockReader → TxPools
//!
//! Late Binding   Consensus → BlockWriter → BlockReadWriter → Handshake
//!                → Syncer → Packer, then APIs bound to pools and reader
//! ```
//!
//! Every stage checks that its inputs exist before it builds anything, even
//! when its own slot was filled by an override.

pub mod assembly;

pub use assembly::{assemble_full, bind_late, bootstrap};

use std::fmt;

/// Assembly stage, reported with every construction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Storage,
    Config,
    Identity,
    Apps,
    Apis,
    Network,
    Broadcaster,
    BlockReader,
    TxPools,
    Consensus,
    BlockWriter,
    BlockReadWriter,
    Handshake,
    Syncer,
    Packer,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Identity => "identity",
            Self::Apps => "apps",
            Self::Apis => "apis",
            Self::Network => "network",
            Self::Broadcaster => "broadcaster",
            Self::BlockReader => "block-reader",
            Self::TxPools => "tx-pools",
            Self::Consensus => "consensus",
            Self::BlockWriter => "block-writer",
            Self::BlockReadWriter => "block-read-writer",
            Self::Handshake => "handshake",
            Self::Syncer => "syncer",
            Self::Packer => "packer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
