//! # Storage Opener
//!
//! Opens the three named stores every full node needs:
//!
//! - `statedata` - chain state and the persisted chain config
//! - `blockdata` - headers and the chain head
//! - `cruddata` - application CRUD records
//!
//! Drivers are selected by name from `[database].driver`: `memory` always,
//! `leveldb`/`rocksdb` only when built with the `rocksdb` feature. Any other
//! name is [`ConfigError::UnsupportedDriver`]. On partial failure every store
//! opened so far is closed before the error is returned.

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

#[cfg(feature = "rocksdb")]
pub use rocksdb_adapter::{RocksDbConfig, RocksDbDriver, RocksDbStore};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, StorageError};

pub const STATE_DATA: &str = "statedata";
pub const BLOCK_DATA: &str = "blockdata";
pub const CRUD_DATA: &str = "cruddata";

/// Handle to one opened key-value store.
///
/// Handles are shared by `Arc`; only the node closes them.
pub trait KvStore: Send + Sync {
    /// Store name (`statedata`, `blockdata`, ...).
    fn name(&self) -> &str;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError>;

    fn delete(&self, key: &[u8]) -> Result<(), StorageError>;

    /// Release the underlying resources. Later calls on the handle fail.
    fn close(&self) -> Result<(), StorageError>;
}

/// Pluggable storage engine.
pub trait StorageDriver: Send + Sync {
    /// Driver identifier as written in the config file.
    fn name(&self) -> &str;

    /// Open (or create) the store `name` at `path`.
    fn open(&self, name: &str, path: &Path) -> Result<Arc<dyn KvStore>, StorageError>;
}

/// Resolve a driver by its configured name.
pub fn resolve_driver(name: &str) -> Result<Arc<dyn StorageDriver>, ConfigError> {
    match name {
        "memory" => Ok(Arc::new(MemoryDriver)),
        #[cfg(feature = "rocksdb")]
        "leveldb" | "rocksdb" => Ok(Arc::new(RocksDbDriver::default())),
        other => Err(ConfigError::UnsupportedDriver(other.to_string())),
    }
}

/// The node's three store handles.
#[derive(Clone)]
pub struct Stores {
    pub state: Arc<dyn KvStore>,
    pub block: Arc<dyn KvStore>,
    pub crud: Arc<dyn KvStore>,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores")
            .field("state", &self.state.name())
            .field("block", &self.block.name())
            .field("crud", &self.crud.name())
            .finish()
    }
}

impl Stores {
    /// Close all three handles, collecting every failure.
    pub fn close(self) -> Vec<StorageError> {
        let mut failures = Vec::new();
        for store in [self.state, self.block, self.crud] {
            match store.close() {
                Ok(()) => debug!(store = store.name(), "[storage] Closed"),
                Err(e) => {
                    warn!(store = store.name(), error = %e, "[storage] Close failed");
                    failures.push(e);
                }
            }
        }
        failures
    }
}

/// Open the state, block and CRUD stores under `base`.
pub fn open_stores(driver: &dyn StorageDriver, base: &Path) -> Result<Stores, StorageError> {
    info!(driver = driver.name(), path = %base.display(), "[storage] Opening stores");

    let state = driver.open(STATE_DATA, &base.join(STATE_DATA))?;
    let block = open_or_release(driver, BLOCK_DATA, base, &[&state])?;
    let crud = open_or_release(driver, CRUD_DATA, base, &[&state, &block])?;

    Ok(Stores { state, block, crud })
}

fn open_or_release(
    driver: &dyn StorageDriver,
    name: &str,
    base: &Path,
    opened: &[&Arc<dyn KvStore>],
) -> Result<Arc<dyn KvStore>, StorageError> {
    driver.open(name, &base.join(name)).inspect_err(|e| {
        warn!(store = name, error = %e, "[storage] Open failed, releasing opened stores");
        for store in opened.iter().rev() {
            if let Err(close_err) = store.close() {
                warn!(store = store.name(), error = %close_err, "[storage] Release failed");
            }
        }
    })
}

/// Driver for process-local stores. Nothing is written to disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryDriver;

impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self, name: &str, _path: &Path) -> Result<Arc<dyn KvStore>, StorageError> {
        Ok(Arc::new(MemoryStore::new(name)))
    }
}

/// In-memory ordered key-value store.
pub struct MemoryStore {
    name: String,
    data: RwLock<Option<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(Some(BTreeMap::new())),
        }
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            name: self.name.clone(),
        }
    }
}

impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read();
        let map = data.as_ref().ok_or_else(|| self.closed())?;
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write();
        let map = data.as_mut().ok_or_else(|| self.closed())?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write();
        let map = data.as_mut().ok_or_else(|| self.closed())?;
        map.remove(key);
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.data.write().take().map(|_| ()).ok_or_else(|| self.closed())
    }
}
