//! # Node Errors
//!
//! Error taxonomy for assembly and lifecycle:
//!
//! - [`ConfigError`] - missing/invalid fields, unsupported driver or algorithm names
//! - [`StorageError`] - store open/close failures
//! - [`NodeError`] - everything the node aggregate reports, with the failing
//!   option, stage or subsystem attached

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::{SubsystemError, SubsystemId};
use crate::runtime::NodeState;
use crate::wiring::Stage;

/// Boxed error returned by collaborator constructors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration errors. Always fatal to assembly.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The node was created without a configuration file path.
    #[error("config file path is empty")]
    MissingConfigFile,

    /// The configuration file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for the expected schema.
    #[error("failed to parse config file {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The `[database].driver` name is not known to this build.
    #[error("unsupported storage driver: {0} (persistent drivers need the `rocksdb` feature)")]
    UnsupportedDriver(String),

    /// `[chain.consensus]` is absent or has no name.
    #[error("consensus algorithm is not declared in [chain.consensus]")]
    MissingConsensus,

    /// `[chain.consensus].name` is not a recognized algorithm.
    #[error("unsupported consensus algorithm: {0}")]
    UnsupportedConsensus(String),

    /// A field holds a value the node cannot use.
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The chain section persisted in the state store could not be decoded.
    #[error("stored chain config is unreadable: {0}")]
    StoredChain(String),
}

/// Storage errors raised by drivers and store handles.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A store could not be opened.
    #[error("failed to open {name} store at {}: {message}", path.display())]
    Open {
        name: String,
        path: PathBuf,
        message: String,
    },

    /// The handle was already closed.
    #[error("{name} store is closed")]
    Closed { name: String },

    /// Read or write failure on an open handle.
    #[error("{name} store I/O failed: {message}")]
    Io { name: String, message: String },

    /// Closing the handle failed.
    #[error("failed to close {name} store: {message}")]
    Close { name: String, message: String },
}

/// Errors reported by the node aggregate.
#[derive(Debug, Error)]
pub enum NodeError {
    /// An override in the option sequence rejected its value.
    #[error("option {option} rejected: {source}")]
    Option {
        option: &'static str,
        #[source]
        source: ConfigError,
    },

    /// Constructor-level configuration problem.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An assembly stage failed; remaining stages were not run.
    #[error("assembly stage {stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: BoxError,
    },

    /// A stage ran before one of its inputs existed.
    #[error("assembly stage {stage} requires {dependency}, which is not assembled")]
    MissingDependency {
        stage: Stage,
        dependency: &'static str,
    },

    /// A subsystem failed to start. Subsystems started before it stay running.
    #[error("failed to start {}: {source}", subsystem.name())]
    Start {
        subsystem: SubsystemId,
        #[source]
        source: SubsystemError,
    },

    /// The requested lifecycle transition is not allowed from the current state.
    #[error("cannot {action} node in state {state}")]
    InvalidTransition {
        action: &'static str,
        state: NodeState,
    },

    /// Teardown ran to completion but some steps failed.
    #[error(
        "shutdown finished with {} subsystem and {} storage failure(s)",
        subsystems.len(),
        storage.len()
    )]
    Shutdown {
        subsystems: Vec<SubsystemError>,
        storage: Vec<StorageError>,
    },
}

impl NodeError {
    pub(crate) fn stage(stage: Stage, source: impl Into<BoxError>) -> Self {
        Self::Stage {
            stage,
            source: source.into(),
        }
    }

    /// The configuration error behind this failure, if there is one.
    pub fn config_error(&self) -> Option<&ConfigError> {
        match self {
            Self::Option { source, .. } => Some(source),
            Self::Config(e) => Some(e),
            Self::Stage { source, .. } => source.downcast_ref::<ConfigError>(),
            _ => None,
        }
    }

    /// The stage that failed, for stage and dependency errors.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } | Self::MissingDependency { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_found_through_stage() {
        let err = NodeError::stage(
            Stage::Storage,
            ConfigError::UnsupportedDriver("lmdb".into()),
        );
        assert!(matches!(
            err.config_error(),
            Some(ConfigError::UnsupportedDriver(name)) if name == "lmdb"
        ));
        assert_eq!(err.failed_stage(), Some(Stage::Storage));
        assert!(err.to_string().contains("lmdb"));
    }

    #[test]
    fn test_shutdown_error_counts() {
        let err = NodeError::Shutdown {
            subsystems: vec![SubsystemError::new(SubsystemId::Syncer, "stuck")],
            storage: vec![],
        };
        assert_eq!(
            err.to_string(),
            "shutdown finished with 1 subsystem and 0 storage failure(s)"
        );
    }
}
