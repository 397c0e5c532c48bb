//! Background syncer and packer.
//!
//! Both run as tokio tasks bound to a child of the node's cancellation token.
//! `stop` cancels the child token and joins the task, so neither outlives the
//! node's teardown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::ports::{
    BlockHeader, BlockReadWriter, Consensus, Handshake, Network, Packer, Syncer, TxPools,
};
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

/// Join a worker task after its token was cancelled.
async fn join_worker(
    id: SubsystemId,
    task: &Mutex<Option<JoinHandle<()>>>,
) -> Result<(), SubsystemError> {
    let handle = task.lock().take();
    match handle {
        Some(handle) => handle
            .await
            .map_err(|e| SubsystemError::new(id, format!("worker task failed: {e}"))),
        None => Ok(()),
    }
}

struct SyncCore {
    read_writer: Arc<dyn BlockReadWriter>,
    network: Arc<dyn Network>,
    handshake: Arc<dyn Handshake>,
    synced: AtomicU64,
}

impl SyncCore {
    fn poll(&self) -> Result<(), SubsystemError> {
        let permitted = self
            .network
            .peers()
            .iter()
            .filter(|peer| self.handshake.is_permitted(peer))
            .count();
        let height = self.read_writer.head()?.map_or(0, |h| h.height);
        self.synced.fetch_max(height, Ordering::SeqCst);
        debug!(peers = permitted, height, "[syncer] Poll");
        Ok(())
    }
}

/// Polls permitted peers and tracks the local head height.
pub struct LocalSyncer {
    core: Arc<SyncCore>,
    interval: Duration,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalSyncer {
    pub fn new(
        read_writer: Arc<dyn BlockReadWriter>,
        network: Arc<dyn Network>,
        handshake: Arc<dyn Handshake>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            core: Arc::new(SyncCore {
                read_writer,
                network,
                handshake,
                synced: AtomicU64::new(0),
            }),
            interval,
            token,
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Subsystem for LocalSyncer {
    fn id(&self) -> SubsystemId {
        SubsystemId::Syncer
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.core.poll()?;

        let core = Arc::clone(&self.core);
        let token = self.token.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = core.poll() {
                            warn!(error = %e, "[syncer] Poll failed");
                        }
                    }
                }
            }
            debug!("[syncer] Worker exited");
        });
        *self.task.lock() = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "[syncer] Started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.token.cancel();
        join_worker(SubsystemId::Syncer, &self.task).await
    }
}

impl Syncer for LocalSyncer {
    fn synced_height(&self) -> u64 {
        self.core.synced.load(Ordering::SeqCst)
    }
}

struct PackCore {
    read_writer: Arc<dyn BlockReadWriter>,
    pools: Arc<dyn TxPools>,
    consensus: Arc<dyn Consensus>,
    max_txs: usize,
    produced: AtomicU64,
}

impl PackCore {
    fn produce(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        let txs = self.pools.take(self.max_txs);
        if txs.is_empty() {
            return Ok(None);
        }
        let parent = self.read_writer.head()?;
        let tx_count = u32::try_from(txs.len())
            .map_err(|_| SubsystemError::new(SubsystemId::Packer, "too many transactions"))?;
        let header = self.consensus.prepare_header(parent.as_ref(), tx_count)?;
        self.read_writer.insert_block(header.clone(), &txs)?;
        self.produced.fetch_add(1, Ordering::SeqCst);
        info!(height = header.height, txs = tx_count, "[packer] Block produced");
        Ok(Some(header))
    }
}

/// Drains the pools into a new block every block interval.
pub struct LocalPacker {
    core: Arc<PackCore>,
    interval: Duration,
    token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LocalPacker {
    pub fn new(
        read_writer: Arc<dyn BlockReadWriter>,
        pools: Arc<dyn TxPools>,
        consensus: Arc<dyn Consensus>,
        max_txs: usize,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            core: Arc::new(PackCore {
                read_writer,
                pools,
                consensus,
                max_txs,
                produced: AtomicU64::new(0),
            }),
            interval,
            token,
            task: Mutex::new(None),
        }
    }

    /// Produce one block from the pending transactions, if there are any.
    pub fn produce_block(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        self.core.produce()
    }
}

#[async_trait]
impl Subsystem for LocalPacker {
    fn id(&self) -> SubsystemId {
        SubsystemId::Packer
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let core = Arc::clone(&self.core);
        let token = self.token.clone();
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = core.produce() {
                            warn!(error = %e, "[packer] Block production failed");
                        }
                    }
                }
            }
            debug!("[packer] Worker exited");
        });
        *self.task.lock() = Some(handle);
        info!(interval_ms = interval.as_millis() as u64, "[packer] Started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.token.cancel();
        join_worker(SubsystemId::Packer, &self.task).await
    }
}

impl Packer for LocalPacker {
    fn produced(&self) -> u64 {
        self.core.produced.load(Ordering::SeqCst)
    }
}
