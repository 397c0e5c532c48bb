//! # Lifecycle Controller
//!
//! The node aggregate and the signal watcher that stops it.

pub mod node;
mod signals;

pub use node::{AssemblyMode, Node, NodeState};
