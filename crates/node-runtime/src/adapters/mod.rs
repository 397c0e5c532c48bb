//! # Adapter Implementations
//!
//! ## Hexagonal Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     OUTER LAYER (Adapters)                          │
//! │  storage drivers, FileNodeKey, Apps/ApiRegistry, local::*           │
//! │                              ↑ implements ↑                         │
//! │                     MIDDLE LAYER (Ports)                            │
//! │  KvStore, StorageDriver, NodeKey, Network, Consensus, TxPools, ...  │
//! │                              ↑ uses ↑                               │
//! │                     NODE (container, wiring, runtime)               │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod dispatch;
pub mod identity;
pub mod local;
pub mod ports;
pub mod storage;

pub use dispatch::{ApiRegistry, Application, Apps};
pub use identity::{FileNodeKey, IdentityError};
pub use ports::*;
pub use storage::{open_stores, resolve_driver, KvStore, MemoryDriver, StorageDriver, Stores};
