//! # Dispatch and API Registries
//!
//! - [`Apps`] maps transaction types to the application that validates them,
//!   keyed by the local node identity.
//! - [`ApiRegistry`] is the query surface. It is bound to storage during full
//!   assembly and to the pools and block reader once late binding finishes.
//!   Those two are held as `Weak`: the network owns the registry, and the
//!   pools reach the network through the broadcaster.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::debug;

use super::ports::{BlockHeader, BlockReader, NodeId, Transaction, TxPools, TxType};
use super::storage::Stores;
use crate::error::StorageError;
use crate::registry::{SubsystemError, SubsystemId};

/// Application handling one transaction type.
pub trait Application: Send + Sync {
    fn tx_type(&self) -> TxType;

    fn validate(&self, tx: &Transaction) -> Result<(), SubsystemError>;
}

/// Transaction-type → application registry.
pub struct Apps {
    node_id: NodeId,
    apps: RwLock<HashMap<TxType, Arc<dyn Application>>>,
}

impl Apps {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            apps: RwLock::new(HashMap::new()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Register an application; replaces any previous one for the same type.
    pub fn register(&self, app: Arc<dyn Application>) {
        let tx_type = app.tx_type();
        debug!(%tx_type, "[apps] Registered application");
        self.apps.write().insert(tx_type, app);
    }

    pub fn get(&self, tx_type: TxType) -> Option<Arc<dyn Application>> {
        self.apps.read().get(&tx_type).cloned()
    }

    /// Registered transaction types, sorted.
    pub fn tx_types(&self) -> Vec<TxType> {
        let mut types: Vec<_> = self.apps.read().keys().copied().collect();
        types.sort();
        types
    }

    /// Validate a transaction with the application for its type.
    pub fn validate(&self, tx: &Transaction) -> Result<(), SubsystemError> {
        match self.get(tx.tx_type) {
            Some(app) => app.validate(tx),
            None => Err(SubsystemError::new(
                SubsystemId::TxPools,
                format!("no application registered for {}", tx.tx_type),
            )),
        }
    }
}

/// API namespaces exposed to peers and local clients.
pub const API_NAMESPACES: [&str; 3] = ["chain", "state", "txpool"];

/// Query surface over storage, pools and the chain.
pub struct ApiRegistry {
    stores: Stores,
    tx_pools: RwLock<Option<Weak<dyn TxPools>>>,
    block_reader: RwLock<Option<Weak<dyn BlockReader>>>,
}

impl ApiRegistry {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            tx_pools: RwLock::new(None),
            block_reader: RwLock::new(None),
        }
    }

    pub fn namespaces(&self) -> &'static [&'static str] {
        &API_NAMESPACES
    }

    pub fn bind_tx_pools(&self, tx_pools: &Arc<dyn TxPools>) {
        *self.tx_pools.write() = Some(Arc::downgrade(tx_pools));
    }

    pub fn bind_block_reader(&self, block_reader: &Arc<dyn BlockReader>) {
        *self.block_reader.write() = Some(Arc::downgrade(block_reader));
    }

    fn tx_pools(&self) -> Option<Arc<dyn TxPools>> {
        self.tx_pools.read().as_ref().and_then(Weak::upgrade)
    }

    fn block_reader(&self) -> Option<Arc<dyn BlockReader>> {
        self.block_reader.read().as_ref().and_then(Weak::upgrade)
    }

    /// Whether both late-bound collaborators are bound and still alive.
    pub fn is_bound(&self) -> bool {
        self.tx_pools().is_some() && self.block_reader().is_some()
    }

    /// `state_get`: raw state lookup.
    pub fn state_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.stores.state.get(key)
    }

    /// `crud_get`: raw CRUD record lookup.
    pub fn crud_get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.stores.crud.get(key)
    }

    /// `chain_head`: `None` while the block reader is unbound or the chain is empty.
    pub fn chain_head(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        match self.block_reader() {
            Some(reader) => reader.head(),
            None => Ok(None),
        }
    }

    /// `txpool_pending`: `None` while the pools are unbound.
    pub fn pending_transactions(&self) -> Option<usize> {
        self.tx_pools().map(|pools| pools.pending())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::{open_stores, MemoryDriver};
    use std::path::Path;

    struct Transfer;

    impl Application for Transfer {
        fn tx_type(&self) -> TxType {
            TxType(1)
        }

        fn validate(&self, tx: &Transaction) -> Result<(), SubsystemError> {
            if tx.payload.is_empty() {
                return Err(SubsystemError::new(SubsystemId::TxPools, "empty transfer"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_apps_routes_by_tx_type() {
        let apps = Apps::new(NodeId([9u8; 32]));
        apps.register(Arc::new(Transfer));
        assert_eq!(apps.tx_types(), vec![TxType(1)]);

        let ok = Transaction {
            tx_type: TxType(1),
            payload: vec![1],
        };
        assert!(apps.validate(&ok).is_ok());

        let empty = Transaction {
            tx_type: TxType(1),
            payload: vec![],
        };
        assert!(apps.validate(&empty).is_err());

        let unknown = Transaction {
            tx_type: TxType(2),
            payload: vec![1],
        };
        let err = apps.validate(&unknown).unwrap_err();
        assert!(err.message.contains("tx-2"));
    }

    #[test]
    fn test_api_registry_unbound_until_late_binding() {
        let stores = open_stores(&MemoryDriver, Path::new("/unused")).unwrap();
        stores.state.put(b"k", b"v").unwrap();

        let apis = ApiRegistry::new(stores);
        assert_eq!(apis.state_get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(!apis.is_bound());
        assert_eq!(apis.pending_transactions(), None);
        assert_eq!(apis.chain_head().unwrap(), None);
    }

    struct Silent;

    impl crate::adapters::ports::Broadcaster for Silent {
        fn broadcast(&self, _topic: &str, _payload: &[u8]) -> Result<usize, SubsystemError> {
            Ok(0)
        }
    }

    #[test]
    fn test_api_registry_does_not_keep_bound_collaborators_alive() {
        use crate::adapters::local::{LocalBlockReader, LocalTxPools};

        let stores = open_stores(&MemoryDriver, Path::new("/unused")).unwrap();
        let apis = ApiRegistry::new(stores.clone());
        let pools: Arc<dyn TxPools> = Arc::new(LocalTxPools::new(
            Arc::new(Apps::new(NodeId([1u8; 32]))),
            Arc::new(Silent),
        ));
        let reader: Arc<dyn BlockReader> =
            Arc::new(LocalBlockReader::new(Arc::clone(&stores.block)));

        apis.bind_tx_pools(&pools);
        apis.bind_block_reader(&reader);
        assert!(apis.is_bound());
        assert_eq!(apis.pending_transactions(), Some(0));

        drop(pools);
        assert!(!apis.is_bound());
        assert_eq!(apis.pending_transactions(), None);

        drop(reader);
        assert_eq!(apis.chain_head().unwrap(), None);
    }
}
