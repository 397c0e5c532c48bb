//! # Ledger Node
//!
//! ```text
//! ledger-node [CONFIG]      (default: conf/node.toml)
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (file, then environment overrides)
//! 2. Full assembly (storage, identity, network, chain, pools)
//! 3. Late binding (consensus, handshake, syncer, packer)
//! 4. Start subsystems in dependency order
//! 5. Wait for SIGINT/SIGTERM, then stop in reverse order

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ledger_node_runtime::{AssemblyMode, Node, NodeConfig, NodeOptions};

const DEFAULT_CONFIG_FILE: &str = "conf/node.toml";

/// Load configuration from the file and environment.
fn load_config(path: &Path) -> Result<NodeConfig> {
    let mut config = NodeConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
        config.data_dir = PathBuf::from(data_dir);
    }
    if let Ok(listen) = std::env::var("LEDGER_P2P_LISTEN") {
        config.network.listen_addr = listen;
    }
    if let Ok(mine) = std::env::var("LEDGER_MINE") {
        match mine.parse() {
            Ok(enabled) => config.packer.enabled = enabled,
            Err(_) => warn!("LEDGER_MINE must be true or false, ignoring {:?}", mine),
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_env("LEDGER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_file = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_file)?;

    let root = CancellationToken::new();
    let node = Arc::new(
        Node::new(
            &root,
            &config_file,
            AssemblyMode::Full,
            NodeOptions::new().with_config(config),
        )
        .context("Node assembly failed")?,
    );

    if let Err(e) = node.bind().await {
        error!(error = %e, "Late binding failed");
        if let Err(stop_err) = node.stop().await {
            warn!(error = %stop_err, "Teardown after failed binding reported errors");
        }
        return Err(e).context("Late binding failed");
    }

    if let Err(e) = node.start().await {
        error!(error = %e, "Start failed");
        if let Err(stop_err) = node.stop().await {
            warn!(error = %stop_err, "Teardown after failed start reported errors");
        }
        return Err(e).context("Node start failed");
    }

    info!("Node is running. Press Ctrl+C to stop.");
    node.wait().await;
    info!("Shutdown complete");

    Ok(())
}
