//! # Node Aggregate
//!
//! Owns every subsystem and store handle and drives them through
//!
//! ```text
//! Created → Assembled → Running → Stopped
//! ```
//!
//! ## Locking
//!
//! - `bind`, `start` and `stop` hold the state lock in write mode for their
//!   whole duration, including the awaited subsystem calls.
//! - Accessors take it in read mode.
//! - `wait` never touches the lock; it only watches the completion channel.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::signals;
use crate::adapters::dispatch::{ApiRegistry, Apps};
use crate::adapters::ports::{BlockReadWriter, NodeKey, TxPool, TxPools, TxType};
use crate::adapters::storage::KvStore;
use crate::container::config::NodeConfig;
use crate::container::options::NodeOptions;
use crate::container::subsystems::Components;
use crate::error::{ConfigError, NodeError};
use crate::registry::{StatusTable, SubsystemId, SubsystemStatus};
use crate::wiring::{assemble_full, bind_late, bootstrap};

/// Lifecycle state of the node aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Overrides applied, assembly not finished.
    Created,
    /// Assembly finished; may or may not be late-bound.
    Assembled,
    /// Every enabled subsystem started.
    Running,
    /// Torn down. Terminal.
    Stopped,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Assembled => "assembled",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// Which assembly phase [`Node::new`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
    /// Configuration and identity only.
    Bootstrap,
    /// Storage and every pre-consensus subsystem.
    Full,
}

struct Inner {
    state: NodeState,
    components: Components,
    status: StatusTable,
    bound: bool,
    start_attempted: bool,
}

impl Inner {
    fn refresh_assembled(&mut self) {
        for id in SubsystemId::START_ORDER {
            if self.components.is_assembled(id)
                && self.status.get(id) == SubsystemStatus::NotAssembled
            {
                self.status.set(id, SubsystemStatus::Assembled);
            }
        }
    }
}

/// The node aggregate.
pub struct Node {
    inner: RwLock<Inner>,
    token: CancellationToken,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    config_file: PathBuf,
    mode: AssemblyMode,
}

impl Node {
    /// Apply `options`, then run the assembly phase selected by `mode`.
    ///
    /// The node's cancellation token is a child of `parent`.
    pub fn new(
        parent: &CancellationToken,
        config_file: impl AsRef<Path>,
        mode: AssemblyMode,
        options: NodeOptions,
    ) -> Result<Self, NodeError> {
        let config_file = config_file.as_ref().to_path_buf();
        if config_file.as_os_str().is_empty() {
            return Err(ConfigError::MissingConfigFile.into());
        }
        info!(
            cpus = num_cpus::get(),
            config = %config_file.display(),
            ?mode,
            "[node] Creating node"
        );

        let mut inner = Inner {
            state: NodeState::Created,
            components: Components::default(),
            status: StatusTable::default(),
            bound: false,
            start_attempted: false,
        };
        options.apply(&mut inner.components)?;

        match mode {
            AssemblyMode::Bootstrap => bootstrap(&mut inner.components, &config_file)?,
            AssemblyMode::Full => assemble_full(&mut inner.components, &config_file)?,
        }
        inner.refresh_assembled();
        inner.state = NodeState::Assembled;

        let (done_tx, done_rx) = watch::channel(false);
        Ok(Self {
            inner: RwLock::new(inner),
            token: parent.child_token(),
            done_tx,
            done_rx,
            config_file,
            mode,
        })
    }

    /// Late Binding. Must run once, after Full Assembly, before [`Node::start`].
    pub async fn bind(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.write().await;
        if inner.state != NodeState::Assembled || inner.bound {
            return Err(NodeError::InvalidTransition {
                action: "bind",
                state: inner.state,
            });
        }

        let result = bind_late(&mut inner.components, &self.token);
        inner.refresh_assembled();
        result?;
        inner.bound = true;
        info!("[node] Late binding complete");
        Ok(())
    }

    /// Start every subsystem in dependency order, then watch for SIGINT and
    /// SIGTERM.
    ///
    /// The first failure is returned as is; subsystems started before it
    /// stay running until [`Node::stop`].
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        self.start_with_shutdown(signals::shutdown_signal()).await
    }

    /// Like [`Node::start`], with `shutdown` as the stop trigger.
    ///
    /// The trigger is only watched after a successful start; on failure it is
    /// dropped unpolled. It resolves to the reason that gets logged.
    pub async fn start_with_shutdown<F>(self: &Arc<Self>, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = &'static str> + Send + 'static,
    {
        let mut inner = self.inner.write().await;
        if inner.state != NodeState::Assembled || !inner.bound || inner.start_attempted {
            return Err(NodeError::InvalidTransition {
                action: "start",
                state: inner.state,
            });
        }
        inner.start_attempted = true;

        let enable_packer = inner
            .components
            .config
            .as_ref()
            .is_some_and(|config| config.enable_packer());

        info!("===========================================");
        info!("  Ledger Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        for id in SubsystemId::START_ORDER {
            if id == SubsystemId::Packer && !enable_packer {
                inner.status.set(id, SubsystemStatus::Disabled);
                continue;
            }
            debug!(
                subsystem = id.name(),
                depends_on = ?id.dependencies(),
                "[node] Starting"
            );
            match inner.components.start(id).await {
                None => continue,
                Some(Ok(())) => {
                    inner.status.set(id, SubsystemStatus::Running);
                    info!(subsystem = id.name(), "[node] Started");
                }
                Some(Err(source)) => {
                    inner.status.set(id, SubsystemStatus::Failed);
                    error!(subsystem = id.name(), error = %source, "[node] Start failed");
                    return Err(NodeError::Start {
                        subsystem: id,
                        source,
                    });
                }
            }
        }

        inner.state = NodeState::Running;
        inner.status.print_status();
        drop(inner);

        signals::spawn_watcher(Arc::downgrade(self), shutdown);
        info!("[node] Running");
        Ok(())
    }

    /// Tear the node down. Safe from any state, and more than once.
    ///
    /// Cancels the node token, stops every assembled subsystem in reverse
    /// start order, closes the stores and releases [`Node::wait`]. Failures
    /// along the way are collected and returned once teardown is complete.
    pub async fn stop(&self) -> Result<(), NodeError> {
        let mut inner = self.inner.write().await;
        if inner.state == NodeState::Stopped {
            return Ok(());
        }
        info!(state = %inner.state, "[node] Stopping");
        self.token.cancel();

        let mut subsystem_failures = Vec::new();
        for id in SubsystemId::stop_order() {
            match inner.components.stop(id).await {
                None => {}
                Some(Ok(())) => inner.status.set(id, SubsystemStatus::Stopped),
                Some(Err(e)) => {
                    warn!(subsystem = id.name(), error = %e, "[node] Stop failed");
                    inner.status.set(id, SubsystemStatus::Failed);
                    subsystem_failures.push(e);
                }
            }
        }

        let storage_failures = inner
            .components
            .stores
            .take()
            .map(|stores| stores.close())
            .unwrap_or_default();

        inner.state = NodeState::Stopped;
        inner.status.print_status();
        self.done_tx.send_replace(true);
        drop(inner);

        if subsystem_failures.is_empty() && storage_failures.is_empty() {
            info!("[node] Stopped");
            Ok(())
        } else {
            Err(NodeError::Shutdown {
                subsystems: subsystem_failures,
                storage: storage_failures,
            })
        }
    }

    /// Resolve once the node has stopped. Any number of callers may wait.
    pub async fn wait(&self) {
        let mut done = self.done_rx.clone();
        // The sender lives as long as `self`, so this only returns on stop
        let _ = done.wait_for(|stopped| *stopped).await;
    }

    /// Root cancellation token of this node.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn mode(&self) -> AssemblyMode {
        self.mode
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub async fn state(&self) -> NodeState {
        self.inner.read().await.state
    }

    pub async fn status(&self, id: SubsystemId) -> SubsystemStatus {
        self.inner.read().await.status.get(id)
    }

    pub async fn status_table(&self) -> StatusTable {
        self.inner.read().await.status.clone()
    }

    pub async fn config(&self) -> Option<Arc<NodeConfig>> {
        self.inner.read().await.components.config.clone()
    }

    pub async fn node_key(&self) -> Option<Arc<dyn NodeKey>> {
        self.inner.read().await.components.node_key.clone()
    }

    pub async fn apps(&self) -> Option<Arc<Apps>> {
        self.inner.read().await.components.apps.clone()
    }

    pub async fn apis(&self) -> Option<Arc<ApiRegistry>> {
        self.inner.read().await.components.apis.clone()
    }

    pub async fn tx_pools(&self) -> Option<Arc<dyn TxPools>> {
        self.inner.read().await.components.tx_pools.clone()
    }

    pub async fn block_read_writer(&self) -> Option<Arc<dyn BlockReadWriter>> {
        self.inner.read().await.components.block_read_writer.clone()
    }

    /// The state store. `None` after stop or for a bootstrap-only node.
    pub async fn state_store(&self) -> Option<Arc<dyn KvStore>> {
        self.inner
            .read()
            .await
            .components
            .stores
            .as_ref()
            .map(|stores| Arc::clone(&stores.state))
    }

    /// Register a transaction pool with the running pool registry.
    pub async fn add_tx_pool(
        &self,
        tx_type: TxType,
        pool: Arc<dyn TxPool>,
    ) -> Result<(), NodeError> {
        let inner = self.inner.read().await;
        match (&inner.components.tx_pools, inner.state) {
            (Some(pools), state) if state != NodeState::Stopped => {
                pools.register(tx_type, pool);
                Ok(())
            }
            (_, state) => Err(NodeError::InvalidTransition {
                action: "add_tx_pool",
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_path_rejected() {
        let err = Node::new(
            &CancellationToken::new(),
            "",
            AssemblyMode::Bootstrap,
            NodeOptions::new().with_config(NodeConfig::dev("/tmp/unused")),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            NodeError::Config(ConfigError::MissingConfigFile)
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_opens_no_storage() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(
            &CancellationToken::new(),
            dir.path().join("node.toml"),
            AssemblyMode::Bootstrap,
            NodeOptions::new().with_config(NodeConfig::dev(dir.path())),
        )
        .unwrap();

        assert_eq!(node.state().await, NodeState::Assembled);
        assert!(node.node_key().await.is_some());
        assert!(node.state_store().await.is_none());
        assert!(node.tx_pools().await.is_none());

        // No block reader, so late binding cannot run
        assert!(matches!(
            node.bind().await,
            Err(NodeError::MissingDependency { .. })
        ));
        node.stop().await.unwrap();
        node.wait().await;
    }

    #[test]
    fn test_state_display() {
        assert_eq!(NodeState::Running.to_string(), "running");
        assert_eq!(
            NodeError::InvalidTransition {
                action: "start",
                state: NodeState::Stopped
            }
            .to_string(),
            "cannot start node in state stopped"
        );
    }
}
