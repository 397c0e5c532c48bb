//! In-memory transaction pools.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::adapters::dispatch::Apps;
use crate::adapters::ports::{Broadcaster, Transaction, TxPool, TxPools, TxType};
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

/// Default number of pending transactions per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 4096;

/// FIFO pool for a single transaction type.
pub struct MemoryTxPool {
    tx_type: TxType,
    capacity: usize,
    queue: Mutex<VecDeque<Transaction>>,
}

impl MemoryTxPool {
    pub fn new(tx_type: TxType, capacity: usize) -> Self {
        Self {
            tx_type,
            capacity,
            queue: Mutex::new(VecDeque::new()),
        }
    }
}

impl TxPool for MemoryTxPool {
    fn add(&self, tx: Transaction) -> Result<(), SubsystemError> {
        if tx.tx_type != self.tx_type {
            return Err(SubsystemError::new(
                SubsystemId::TxPools,
                format!("{} pool cannot hold {}", self.tx_type, tx.tx_type),
            ));
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(SubsystemError::new(
                SubsystemId::TxPools,
                format!("{} pool is full", self.tx_type),
            ));
        }
        queue.push_back(tx);
        Ok(())
    }

    fn take(&self, max: usize) -> Vec<Transaction> {
        let mut queue = self.queue.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.queue.lock().len()
    }
}

/// Pool registry. Admission goes through the application registered for
/// the transaction's type; admitted transactions are gossiped.
pub struct LocalTxPools {
    apps: Arc<Apps>,
    broadcaster: Arc<dyn Broadcaster>,
    pools: RwLock<BTreeMap<TxType, Arc<dyn TxPool>>>,
}

impl LocalTxPools {
    pub fn new(apps: Arc<Apps>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self {
            apps,
            broadcaster,
            pools: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registered transaction types, in drain order.
    pub fn tx_types(&self) -> Vec<TxType> {
        self.pools.read().keys().copied().collect()
    }
}

#[async_trait]
impl Subsystem for LocalTxPools {
    fn id(&self) -> SubsystemId {
        SubsystemId::TxPools
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        // Every application gets a pool unless one was registered already
        let mut pools = self.pools.write();
        for tx_type in self.apps.tx_types() {
            pools.entry(tx_type).or_insert_with(|| {
                Arc::new(MemoryTxPool::new(tx_type, DEFAULT_POOL_CAPACITY)) as Arc<dyn TxPool>
            });
        }
        info!(pools = pools.len(), "[txpool] Ready");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let pending: usize = self.pools.read().values().map(|p| p.len()).sum();
        if pending > 0 {
            debug!(pending, "[txpool] Dropping pending transactions");
        }
        Ok(())
    }
}

impl TxPools for LocalTxPools {
    fn register(&self, tx_type: TxType, pool: Arc<dyn TxPool>) {
        debug!(%tx_type, "[txpool] Pool registered");
        self.pools.write().insert(tx_type, pool);
    }

    fn pool(&self, tx_type: TxType) -> Option<Arc<dyn TxPool>> {
        self.pools.read().get(&tx_type).cloned()
    }

    fn submit(&self, tx: Transaction) -> Result<(), SubsystemError> {
        self.apps.validate(&tx)?;
        let pool = self.pool(tx.tx_type).ok_or_else(|| {
            SubsystemError::new(
                SubsystemId::TxPools,
                format!("no pool registered for {}", tx.tx_type),
            )
        })?;

        let gossip = serde_json::to_vec(&tx)
            .map_err(|e| SubsystemError::new(SubsystemId::TxPools, e.to_string()))?;
        pool.add(tx)?;
        if let Err(e) = self.broadcaster.broadcast("tx", &gossip) {
            warn!(error = %e, "[txpool] Gossip failed");
        }
        Ok(())
    }

    fn take(&self, max: usize) -> Vec<Transaction> {
        let pools: Vec<_> = self.pools.read().values().cloned().collect();
        let mut taken = Vec::new();
        for pool in pools {
            if taken.len() >= max {
                break;
            }
            taken.extend(pool.take(max - taken.len()));
        }
        taken
    }

    fn pending(&self) -> usize {
        self.pools.read().values().map(|p| p.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::dispatch::Application;
    use crate::adapters::ports::NodeId;

    struct AnyPayload(TxType);

    impl Application for AnyPayload {
        fn tx_type(&self) -> TxType {
            self.0
        }

        fn validate(&self, _tx: &Transaction) -> Result<(), SubsystemError> {
            Ok(())
        }
    }

    struct Silent;

    impl Broadcaster for Silent {
        fn broadcast(&self, _topic: &str, _payload: &[u8]) -> Result<usize, SubsystemError> {
            Ok(0)
        }
    }

    fn tx(tx_type: u16, byte: u8) -> Transaction {
        Transaction {
            tx_type: TxType(tx_type),
            payload: vec![byte],
        }
    }

    #[test]
    fn test_memory_pool_capacity_and_type() {
        let pool = MemoryTxPool::new(TxType(1), 1);
        assert!(pool.add(tx(2, 0)).is_err());
        pool.add(tx(1, 0)).unwrap();
        assert!(pool.add(tx(1, 1)).is_err());
        assert_eq!(pool.take(10), vec![tx(1, 0)]);
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_pools_created_for_apps_on_start() {
        let apps = Arc::new(Apps::new(NodeId([1u8; 32])));
        apps.register(Arc::new(AnyPayload(TxType(1))));
        apps.register(Arc::new(AnyPayload(TxType(2))));
        let pools = LocalTxPools::new(apps, Arc::new(Silent));

        assert!(pools.submit(tx(1, 0)).is_err());
        pools.start().await.unwrap();
        assert_eq!(pools.tx_types(), vec![TxType(1), TxType(2)]);

        pools.submit(tx(2, 9)).unwrap();
        pools.submit(tx(1, 8)).unwrap();
        pools.submit(tx(1, 7)).unwrap();
        assert_eq!(pools.pending(), 3);

        // Drains in type order, FIFO within a pool
        assert_eq!(pools.take(2), vec![tx(1, 8), tx(1, 7)]);
        assert_eq!(pools.take(5), vec![tx(2, 9)]);
        assert_eq!(pools.pending(), 0);
    }

    #[tokio::test]
    async fn test_submit_without_application_rejected() {
        let apps = Arc::new(Apps::new(NodeId([1u8; 32])));
        let pools = LocalTxPools::new(apps, Arc::new(Silent));
        pools.register(TxType(4), Arc::new(MemoryTxPool::new(TxType(4), 8)));

        let err = pools.submit(tx(4, 0)).unwrap_err();
        assert!(err.message.contains("no application"));
    }
}
