//! Shared fixtures: recording subsystems and a storage driver that counts
//! open and close calls.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use ledger_node_runtime::adapters::ports::{
    BlockHeader, BlockReader, Consensus, Handshake, Network, NodeId, Packer, Syncer, Transaction,
    TxPool, TxPools, TxType,
};
use ledger_node_runtime::adapters::storage::{KvStore, MemoryStore, StorageDriver};
use ledger_node_runtime::{NodeConfig, NodeOptions, StorageError, Subsystem, SubsystemError, SubsystemId};

/// Shared call log, e.g. `["start:network", "stop:network"]`.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Entries with the given prefix, prefix stripped.
    pub fn calls(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

/// Which lifecycle call of which subsystem should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fail {
    Start(SubsystemId),
    Stop(SubsystemId),
}

/// Subsystem double implementing every lifecycle port.
pub struct Recording {
    id: SubsystemId,
    log: CallLog,
    fail: Option<Fail>,
}

impl Recording {
    pub fn new(id: SubsystemId, log: &CallLog, fail: Option<Fail>) -> Arc<Self> {
        Arc::new(Self {
            id,
            log: log.clone(),
            fail,
        })
    }
}

#[async_trait]
impl Subsystem for Recording {
    fn id(&self) -> SubsystemId {
        self.id
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.log.push(format!("start:{}", self.id.name()));
        if self.fail == Some(Fail::Start(self.id)) {
            return Err(SubsystemError::new(self.id, "start refused"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.log.push(format!("stop:{}", self.id.name()));
        if self.fail == Some(Fail::Stop(self.id)) {
            return Err(SubsystemError::new(self.id, "stop refused"));
        }
        Ok(())
    }
}

impl BlockReader for Recording {
    fn head(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        Ok(None)
    }

    fn header(&self, _height: u64) -> Result<Option<BlockHeader>, SubsystemError> {
        Ok(None)
    }
}

impl Network for Recording {
    fn register_protocol(&self, _name: &str) {}

    fn peers(&self) -> Vec<NodeId> {
        Vec::new()
    }

    fn send_all(&self, _topic: &str, _payload: &[u8]) -> Result<usize, SubsystemError> {
        Ok(0)
    }
}

impl TxPools for Recording {
    fn register(&self, tx_type: TxType, _pool: Arc<dyn TxPool>) {
        self.log.push(format!("register:{tx_type}"));
    }

    fn pool(&self, _tx_type: TxType) -> Option<Arc<dyn TxPool>> {
        None
    }

    fn submit(&self, _tx: Transaction) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn take(&self, _max: usize) -> Vec<Transaction> {
        Vec::new()
    }

    fn pending(&self) -> usize {
        0
    }
}

impl Handshake for Recording {
    fn is_permitted(&self, _peer: &NodeId) -> bool {
        true
    }
}

impl Consensus for Recording {
    fn algorithm(&self) -> &str {
        "recording"
    }

    fn verify_header(
        &self,
        _parent: Option<&BlockHeader>,
        _header: &BlockHeader,
    ) -> Result<(), SubsystemError> {
        Ok(())
    }

    fn prepare_header(
        &self,
        parent: Option<&BlockHeader>,
        tx_count: u32,
    ) -> Result<BlockHeader, SubsystemError> {
        Ok(BlockHeader {
            height: parent.map_or(0, |p| p.height + 1),
            parent_hash: parent.map_or([0u8; 32], |p| p.hash()),
            proposer: NodeId([0u8; 32]),
            timestamp_ms: 0,
            tx_count,
        })
    }
}

impl Syncer for Recording {
    fn synced_height(&self) -> u64 {
        0
    }
}

impl Packer for Recording {
    fn produced(&self) -> u64 {
        0
    }
}

/// Overrides every lifecycle slot with a [`Recording`] double.
pub fn recording_options(log: &CallLog, fail: Option<Fail>) -> NodeOptions {
    NodeOptions::new()
        .with_block_reader(Recording::new(SubsystemId::BlockReader, log, fail))
        .with_network(Recording::new(SubsystemId::Network, log, fail))
        .with_tx_pools(Recording::new(SubsystemId::TxPools, log, fail))
        .with_handshake(Recording::new(SubsystemId::Handshake, log, fail))
        .with_consensus(Recording::new(SubsystemId::Consensus, log, fail))
        .with_syncer(Recording::new(SubsystemId::Syncer, log, fail))
        .with_packer(Recording::new(SubsystemId::Packer, log, fail))
}

/// Store that reports its close to the owning driver.
struct CountingStore {
    inner: MemoryStore,
    closed: Arc<AtomicUsize>,
}

impl KvStore for CountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        self.inner.delete(key)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()?;
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory driver counting opens and closes; optionally fails the N-th open
/// or seeds a store with an entry as if a previous run had written it.
#[derive(Default)]
pub struct CountingDriver {
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    fail_on: Option<usize>,
    seed: Option<(String, Vec<u8>, Vec<u8>)>,
}

impl CountingDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(n),
            ..Self::default()
        })
    }

    pub fn preloaded(store: &str, key: &[u8], value: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            seed: Some((store.to_string(), key.to_vec(), value.to_vec())),
            ..Self::default()
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.opened() - self.closed()
    }
}

impl StorageDriver for CountingDriver {
    fn name(&self) -> &str {
        "counting"
    }

    fn open(&self, name: &str, path: &Path) -> Result<Arc<dyn KvStore>, StorageError> {
        if self.fail_on == Some(self.opened() + 1) {
            return Err(StorageError::Open {
                name: name.to_string(),
                path: path.to_path_buf(),
                message: "injected failure".to_string(),
            });
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let inner = MemoryStore::new(name);
        if let Some((store, key, value)) = &self.seed {
            if store == name {
                inner.put(key, value)?;
            }
        }
        Ok(Arc::new(CountingStore {
            inner,
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// Development config rooted in `dir`, with block production enabled.
pub fn dev_config(dir: &Path) -> NodeConfig {
    let mut config = NodeConfig::dev(dir);
    config.packer.enabled = true;
    config
}

/// The lifecycle subsystems in start order, by name.
pub fn start_order_names() -> Vec<String> {
    SubsystemId::START_ORDER
        .iter()
        .map(|id| id.name().to_string())
        .collect()
}
