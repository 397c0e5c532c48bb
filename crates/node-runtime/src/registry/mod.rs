//! # Subsystem Registry
//!
//! Identity, ordering and status of the node's long-running subsystems.
//!
//! ## Start Order
//!
//! ```text
//! BlockReader → Network → TxPools → Handshake → Consensus → Syncer → Packer
//! ```
//!
//! Networking must be live before handshake and sync can exchange data;
//! consensus must be live before the packer produces blocks. Stop walks the
//! same list backwards.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Identifier for every component that can report a lifecycle error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubsystemId {
    /// Block Reader (chain head, header lookups)
    BlockReader,
    /// Networking service
    Network,
    /// Transaction Pool registry
    TxPools,
    /// Handshake/Permission manager
    Handshake,
    /// Consensus engine
    Consensus,
    /// Block synchronization
    Syncer,
    /// Block production
    Packer,
    /// Message fan-out (no lifecycle of its own)
    Broadcaster,
    /// Block writer (no lifecycle of its own)
    BlockWriter,
}

impl SubsystemId {
    /// Subsystems with a lifecycle, in start order.
    pub const START_ORDER: [SubsystemId; 7] = [
        Self::BlockReader,
        Self::Network,
        Self::TxPools,
        Self::Handshake,
        Self::Consensus,
        Self::Syncer,
        Self::Packer,
    ];

    /// Get the subsystem name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BlockReader => "block-reader",
            Self::Network => "network",
            Self::TxPools => "tx-pools",
            Self::Handshake => "handshake",
            Self::Consensus => "consensus",
            Self::Syncer => "syncer",
            Self::Packer => "packer",
            Self::Broadcaster => "broadcaster",
            Self::BlockWriter => "block-writer",
        }
    }

    /// Subsystems that MUST be running before this one starts.
    #[must_use]
    pub fn dependencies(&self) -> Vec<SubsystemId> {
        match self {
            Self::BlockReader | Self::Network => vec![],
            Self::TxPools => vec![Self::BlockReader],
            Self::Handshake => vec![Self::Network],
            Self::Consensus => vec![Self::BlockReader],
            Self::Syncer => vec![Self::Network, Self::Handshake],
            Self::Packer => vec![Self::Consensus, Self::TxPools],
            Self::Broadcaster => vec![Self::Network],
            Self::BlockWriter => vec![Self::BlockReader, Self::Consensus],
        }
    }

    /// Stop order: the exact reverse of [`Self::START_ORDER`].
    pub fn stop_order() -> impl Iterator<Item = SubsystemId> {
        Self::START_ORDER.into_iter().rev()
    }
}

impl std::fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Subsystem status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemStatus {
    /// No instance exists yet.
    NotAssembled,
    /// Built, not started.
    Assembled,
    /// Running normally.
    Running,
    /// Stopped (cleanly or not).
    Stopped,
    /// Start or stop returned an error.
    Failed,
    /// Skipped by configuration.
    Disabled,
}

/// Lifecycle contract every long-running subsystem implements.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Get the subsystem ID.
    fn id(&self) -> SubsystemId;

    /// Get the subsystem name.
    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Start the subsystem. Called at most once by the node.
    async fn start(&self) -> Result<(), SubsystemError>;

    /// Stop the subsystem. Must tolerate being called without a prior start.
    async fn stop(&self) -> Result<(), SubsystemError>;
}

/// Subsystem error type.
#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", subsystem.name())]
pub struct SubsystemError {
    pub subsystem: SubsystemId,
    pub message: String,
}

impl SubsystemError {
    pub fn new(subsystem: SubsystemId, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            message: message.into(),
        }
    }
}

/// Per-subsystem status, owned by the node and mutated under its lock.
#[derive(Debug, Default, Clone)]
pub struct StatusTable {
    status: HashMap<SubsystemId, SubsystemStatus>,
}

impl StatusTable {
    pub fn set(&mut self, id: SubsystemId, status: SubsystemStatus) {
        self.status.insert(id, status);
    }

    /// Get status of a subsystem.
    pub fn get(&self, id: SubsystemId) -> SubsystemStatus {
        self.status
            .get(&id)
            .copied()
            .unwrap_or(SubsystemStatus::NotAssembled)
    }

    /// Subsystems currently marked running, in start order.
    pub fn running(&self) -> Vec<SubsystemId> {
        SubsystemId::START_ORDER
            .into_iter()
            .filter(|id| self.get(*id) == SubsystemStatus::Running)
            .collect()
    }

    /// Print registry status.
    pub fn print_status(&self) {
        info!("===========================================");
        info!("  SUBSYSTEM STATUS");
        info!("===========================================");

        for id in SubsystemId::START_ORDER {
            let state = self.get(id);
            let icon = match state {
                SubsystemStatus::Running => "✅",
                SubsystemStatus::Disabled => "⏸️ ",
                SubsystemStatus::Failed => "❌",
                SubsystemStatus::Stopped => "⏹️ ",
                _ => "⏳",
            };
            info!("  {} {:14} {:?}", icon, id.name(), state);
        }

        info!("===========================================");
    }
}
