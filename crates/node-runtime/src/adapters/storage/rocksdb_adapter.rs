//! # RocksDB Storage Adapter
//!
//! Persistent driver behind the `leveldb` and `rocksdb` driver names.
//!
//! ## Configuration
//!
//! Tuned for small ledger stores:
//! - Snappy compression
//! - Bloom filters (10 bits per key)
//! - Optional fsync on write for durability

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{BlockBasedOptions, Cache, DBCompressionType, Options, WriteOptions, DB};

use super::{KvStore, StorageDriver};
use crate::error::StorageError;

/// RocksDB tuning shared by every store the driver opens.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 16MB)
    pub write_buffer_size: usize,
    /// Maximum number of write buffers (default: 3)
    pub max_write_buffer_number: i32,
    /// Enable fsync after each write (default: true for durability)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 64 * 1024 * 1024,
            write_buffer_size: 16 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Create config for testing (smaller buffers, no sync)
    pub fn for_testing() -> Self {
        Self {
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

/// Driver opening one RocksDB instance per named store.
#[derive(Debug, Clone, Default)]
pub struct RocksDbDriver {
    config: RocksDbConfig,
}

impl RocksDbDriver {
    pub fn new(config: RocksDbConfig) -> Self {
        Self { config }
    }
}

impl StorageDriver for RocksDbDriver {
    fn name(&self) -> &str {
        "rocksdb"
    }

    fn open(&self, name: &str, path: &Path) -> Result<Arc<dyn KvStore>, StorageError> {
        Ok(Arc::new(RocksDbStore::open(name, path, &self.config)?))
    }
}

/// RocksDB-backed store. The database closes when the handle is closed.
pub struct RocksDbStore {
    name: String,
    db: RwLock<Option<DB>>,
    sync_writes: bool,
}

impl RocksDbStore {
    /// Open or create a RocksDB database
    pub fn open(name: &str, path: &Path, config: &RocksDbConfig) -> Result<Self, StorageError> {
        let open_error = |message: String| StorageError::Open {
            name: name.to_string(),
            path: path.to_path_buf(),
            message,
        };

        fs::create_dir_all(path).map_err(|e| open_error(e.to_string()))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(DBCompressionType::Snappy);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let db = DB::open(&opts, path).map_err(|e| open_error(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            db: RwLock::new(Some(db)),
            sync_writes: config.sync_writes,
        })
    }

    fn io_error(&self, e: rocksdb::Error) -> StorageError {
        StorageError::Io {
            name: self.name.clone(),
            message: e.to_string(),
        }
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            name: self.name.clone(),
        }
    }

    fn write_opts(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        write_opts
    }
}

impl KvStore for RocksDbStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let db = self.db.read();
        let db = db.as_ref().ok_or_else(|| self.closed())?;
        db.get(key).map_err(|e| self.io_error(e))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let db = self.db.read();
        let db = db.as_ref().ok_or_else(|| self.closed())?;
        db.put_opt(key, value, &self.write_opts())
            .map_err(|e| self.io_error(e))
    }

    fn delete(&self, key: &[u8]) -> Result<(), StorageError> {
        let db = self.db.read();
        let db = db.as_ref().ok_or_else(|| self.closed())?;
        db.delete_opt(key, &self.write_opts())
            .map_err(|e| self.io_error(e))
    }

    fn close(&self) -> Result<(), StorageError> {
        let db = self.db.write().take().ok_or_else(|| self.closed())?;
        db.flush().map_err(|e| StorageError::Close {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        drop(db);
        Ok(())
    }
}
