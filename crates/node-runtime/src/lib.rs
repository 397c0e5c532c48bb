//! # Ledger Node Runtime Library
//!
//! Assembly and lifecycle orchestration for a ledger node. The binary in
//! `main.rs` is a thin wrapper around [`runtime::Node`].
//!
//! ## Layout
//!
//! - `container/` - configuration, overrides and subsystem slots
//! - `wiring/` - phased assembly (bootstrap, full assembly, late binding)
//! - `runtime/` - the node aggregate: start, stop, wait, signal handling
//! - `registry/` - subsystem identities, start order and status
//! - `adapters/` - collaborator ports and their built-in implementations

#![allow(clippy::type_complexity)]

pub mod adapters;
pub mod container;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod wiring;

pub use container::{NodeConfig, NodeOption, NodeOptions};
pub use error::{ConfigError, NodeError, StorageError};
pub use registry::{Subsystem, SubsystemError, SubsystemId, SubsystemStatus};
pub use runtime::{AssemblyMode, Node, NodeState};
