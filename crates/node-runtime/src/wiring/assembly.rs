//! # Phased Assembler
//!
//! Fills the empty slots of a [`Components`] with the built-in collaborators.
//!
//! ## Failure Policy
//!
//! - The first failing stage aborts the phase and is named in the error.
//! - Full Assembly closes the stores it opened before returning an error.
//! - Late Binding leaves what it built in place; the node's teardown
//!   releases it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::Stage;
use crate::adapters::dispatch::{ApiRegistry, Apps};
use crate::adapters::identity::FileNodeKey;
use crate::adapters::local::{
    LocalBlockReadWriter, LocalBlockReader, LocalBlockWriter, LocalBroadcaster, LocalConsensus,
    LocalHandshake, LocalNetwork, LocalPacker, LocalSyncer, LocalTxPools,
};
use crate::adapters::ports::{
    BlockReadWriter, BlockReader, BlockWriter, Broadcaster, Consensus, Handshake, Network,
    NodeKey, Packer, Syncer, TxPools,
};
use crate::adapters::storage::{open_stores, resolve_driver, StorageDriver, Stores};
use crate::container::config::{DatabaseConfig, NodeConfig};
use crate::container::subsystems::Components;
use crate::error::{BoxError, NodeError};

/// Take an existing input for `stage`, or report it missing.
fn require<T: ?Sized>(
    slot: &Option<Arc<T>>,
    stage: Stage,
    dependency: &'static str,
) -> Result<Arc<T>, NodeError> {
    slot.clone()
        .ok_or(NodeError::MissingDependency { stage, dependency })
}

fn require_stores(components: &Components, stage: Stage) -> Result<Stores, NodeError> {
    components
        .stores
        .clone()
        .ok_or(NodeError::MissingDependency {
            stage,
            dependency: "stores",
        })
}

/// Keep an injected instance, or build one and store it in `slot`.
fn fill<T: ?Sized>(
    slot: &mut Option<Arc<T>>,
    stage: Stage,
    build: impl FnOnce() -> Result<Arc<T>, BoxError>,
) -> Result<Arc<T>, NodeError> {
    if let Some(existing) = slot {
        debug!(%stage, "[assembly] Using injected instance");
        return Ok(Arc::clone(existing));
    }
    let built = build().map_err(|e| NodeError::stage(stage, e))?;
    *slot = Some(Arc::clone(&built));
    debug!(%stage, "[assembly] Built");
    Ok(built)
}

fn load_config(
    components: &mut Components,
    config_file: &Path,
) -> Result<Arc<NodeConfig>, NodeError> {
    fill(&mut components.config, Stage::Config, || {
        Ok(Arc::new(NodeConfig::load(config_file)?))
    })
}

fn load_identity(components: &mut Components) -> Result<Arc<dyn NodeKey>, NodeError> {
    let config = require(&components.config, Stage::Identity, "config")?;
    fill(&mut components.node_key, Stage::Identity, || {
        let key = FileNodeKey::load_or_generate(&config.layout().keystore)?;
        info!(node_id = %key.node_id().short(), "[assembly] Identity ready");
        let key: Arc<dyn NodeKey> = Arc::new(key);
        Ok(key)
    })
}

/// Bootstrap: configuration and identity only. Never touches storage.
#[instrument(name = "bootstrap", skip_all)]
pub fn bootstrap(components: &mut Components, config_file: &Path) -> Result<(), NodeError> {
    info!("[assembly] Bootstrap");
    load_config(components, config_file)?;
    load_identity(components)?;
    Ok(())
}

/// Full Assembly: storage first, then everything that can exist before a
/// consensus engine is chosen.
#[instrument(name = "full_assembly", skip_all)]
pub fn assemble_full(components: &mut Components, config_file: &Path) -> Result<(), NodeError> {
    info!("[assembly] Phase 1: Storage");
    let stores = open_storage(components, config_file)?;
    components.stores = Some(stores);

    if let Err(e) = assemble_on_storage(components, config_file) {
        if let Some(stores) = components.stores.take() {
            warn!(error = %e, "[assembly] Full assembly failed, closing stores");
            for failure in stores.close() {
                warn!(error = %failure, "[assembly] Store close failed during cleanup");
            }
        }
        return Err(e);
    }
    Ok(())
}

fn open_storage(components: &Components, config_file: &Path) -> Result<Stores, NodeError> {
    // Storage opens before the configuration is built, so only the
    // [database] section is read here
    let (database, base) = match &components.config {
        Some(config) => (config.database.clone(), config.storage_path()),
        None => DatabaseConfig::load(config_file)
            .map_err(|e| NodeError::stage(Stage::Storage, e))?,
    };

    let driver: Arc<dyn StorageDriver> = match &components.storage_driver {
        Some(driver) => Arc::clone(driver),
        None => resolve_driver(&database.driver)
            .map_err(|e| NodeError::stage(Stage::Storage, e))?,
    };

    open_stores(driver.as_ref(), &base).map_err(|e| NodeError::stage(Stage::Storage, e))
}

fn assemble_on_storage(components: &mut Components, config_file: &Path) -> Result<(), NodeError> {
    let stores = require_stores(components, Stage::Config)?;

    info!("[assembly] Phase 2: Configuration and identity");
    // An injected config is used as given; only a file-loaded one yields to
    // the chain section persisted in the state store
    let injected = components.config.is_some();
    let config = fill(&mut components.config, Stage::Config, || {
        let config = NodeConfig::load(config_file)?.bind_storage(stores.state.as_ref())?;
        Ok(Arc::new(config))
    })?;
    if injected {
        if let Some(stored) = config
            .seed_storage(stores.state.as_ref())
            .map_err(|e| NodeError::stage(Stage::Config, e))?
        {
            if stored != config.chain {
                warn!(
                    stored_chain_id = stored.chain_id,
                    chain_id = config.chain.chain_id,
                    "[assembly] Injected chain config differs from stored copy"
                );
            }
        }
    }
    config
        .layout()
        .ensure()
        .map_err(|e| NodeError::stage(Stage::Config, e))?;
    let node_key = load_identity(components)?;

    info!("[assembly] Phase 3: Dispatch and APIs");
    let apps = fill(&mut components.apps, Stage::Apps, || {
        Ok(Arc::new(Apps::new(node_key.node_id())))
    })?;
    let apis = fill(&mut components.apis, Stage::Apis, || {
        Ok(Arc::new(ApiRegistry::new(stores.clone())))
    })?;

    info!("[assembly] Phase 4: Network");
    let network = fill(&mut components.network, Stage::Network, || {
        let network: Arc<dyn Network> =
            Arc::new(LocalNetwork::new(&config.network, Arc::clone(&apis))?);
        Ok(network)
    })?;
    let broadcaster = fill(&mut components.broadcaster, Stage::Broadcaster, || {
        let broadcaster: Arc<dyn Broadcaster> =
            Arc::new(LocalBroadcaster::new(Arc::clone(&network), config.chain.chain_id));
        Ok(broadcaster)
    })?;

    info!("[assembly] Phase 5: Chain and pools");
    fill(&mut components.block_reader, Stage::BlockReader, || {
        let reader: Arc<dyn BlockReader> =
            Arc::new(LocalBlockReader::new(Arc::clone(&stores.block)));
        Ok(reader)
    })?;

    fill(&mut components.tx_pools, Stage::TxPools, || {
        let pools: Arc<dyn TxPools> = Arc::new(LocalTxPools::new(
            Arc::clone(&apps),
            Arc::clone(&broadcaster),
        ));
        Ok(pools)
    })?;

    debug!("[assembly] Full assembly complete");
    Ok(())
}

/// Late Binding: consensus and everything that needs it.
///
/// Background workers get children of `token`.
#[instrument(name = "late_binding", skip_all)]
pub fn bind_late(components: &mut Components, token: &CancellationToken) -> Result<(), NodeError> {
    let config = require(&components.config, Stage::Consensus, "config")?;
    let node_key = require(&components.node_key, Stage::Consensus, "node_key")?;
    let block_reader = require(&components.block_reader, Stage::Consensus, "block_reader")?;
    let broadcaster = require(&components.broadcaster, Stage::Consensus, "broadcaster")?;
    let stores = require_stores(components, Stage::Consensus)?;

    info!("[assembly] Phase 6: Consensus");
    let consensus = fill(&mut components.consensus, Stage::Consensus, || {
        let algorithm = config.chain.consensus_algorithm()?;
        let declared = config.chain.consensus.clone().unwrap_or_default();
        let consensus: Arc<dyn Consensus> = Arc::new(LocalConsensus::new(
            algorithm,
            &declared,
            node_key.node_id(),
            Arc::clone(&block_reader),
            Arc::clone(&broadcaster),
            Arc::clone(&stores.state),
        )?);
        info!(algorithm = algorithm.name(), "[assembly] Consensus engine built");
        Ok(consensus)
    })?;

    info!("[assembly] Phase 7: Block writer");
    let apps = require(&components.apps, Stage::BlockWriter, "apps")?;
    let block_writer = fill(&mut components.block_writer, Stage::BlockWriter, || {
        let writer: Arc<dyn BlockWriter> = Arc::new(LocalBlockWriter::new(
            Arc::clone(&stores.block),
            Arc::clone(&block_reader),
            Arc::clone(&consensus),
            Arc::clone(&apps),
        ));
        Ok(writer)
    })?;
    let read_writer = fill(&mut components.block_read_writer, Stage::BlockReadWriter, || {
        let rw: Arc<dyn BlockReadWriter> = Arc::new(LocalBlockReadWriter::new(
            Arc::clone(&block_reader),
            Arc::clone(&block_writer),
        ));
        Ok(rw)
    })?;

    info!("[assembly] Phase 8: Handshake and sync");
    let network = require(&components.network, Stage::Handshake, "network")?;
    let handshake = fill(&mut components.handshake, Stage::Handshake, || {
        let handshake: Arc<dyn Handshake> = Arc::new(LocalHandshake::new(
            &config.permission,
            Arc::clone(&network),
            Arc::clone(&read_writer),
            broadcaster,
        )?);
        Ok(handshake)
    })?;
    fill(&mut components.syncer, Stage::Syncer, || {
        let syncer: Arc<dyn Syncer> = Arc::new(LocalSyncer::new(
            Arc::clone(&read_writer),
            network,
            handshake,
            Duration::from_millis(config.syncer.poll_interval_ms),
            token.child_token(),
        ));
        Ok(syncer)
    })?;

    info!("[assembly] Phase 9: Packer");
    let tx_pools = require(&components.tx_pools, Stage::Packer, "tx_pools")?;
    fill(&mut components.packer, Stage::Packer, || {
        let interval = config
            .chain
            .consensus
            .as_ref()
            .map_or(1000, |c| c.block_interval_ms);
        let packer: Arc<dyn Packer> = Arc::new(LocalPacker::new(
            Arc::clone(&read_writer),
            Arc::clone(&tx_pools),
            Arc::clone(&consensus),
            config.packer.max_txs_per_block,
            Duration::from_millis(interval),
            token.child_token(),
        ));
        Ok(packer)
    })?;

    let apis = require(&components.apis, Stage::Apis, "apis")?;
    apis.bind_tx_pools(&tx_pools);
    apis.bind_block_reader(&block_reader);
    debug!(tx_types = apps.tx_types().len(), "[assembly] Late binding complete");
    Ok(())
}
