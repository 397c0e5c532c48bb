//! # Subsystem Container
//!
//! Configuration, the override sequence, and the slots that hold every
//! subsystem instance the node owns.

pub mod config;
pub mod options;
pub mod subsystems;

pub use config::{DataDir, NodeConfig};
pub use options::{NodeOption, NodeOptions};
pub use subsystems::Components;
