//! Block reader, writer and read-writer over the `blockdata` store.
//!
//! Layout:
//!
//! ```text
//! head            → height (u64, big endian)
//! header/<height> → JSON-encoded BlockHeader
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::adapters::dispatch::Apps;
use crate::adapters::ports::{
    BlockHeader, BlockReadWriter, BlockReader, BlockWriter, Consensus, NodeId, Transaction,
};
use crate::adapters::storage::KvStore;
use crate::error::StorageError;
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

const HEAD_KEY: &[u8] = b"head";

fn header_key(height: u64) -> Vec<u8> {
    format!("header/{height:020}").into_bytes()
}

fn storage_error(id: SubsystemId) -> impl Fn(StorageError) -> SubsystemError {
    move |e| SubsystemError::new(id, e.to_string())
}

fn read_header(
    store: &dyn KvStore,
    height: u64,
    id: SubsystemId,
) -> Result<Option<BlockHeader>, SubsystemError> {
    let Some(raw) = store.get(&header_key(height)).map_err(storage_error(id))? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|e| SubsystemError::new(id, format!("corrupt header {height}: {e}")))
}

fn read_head(store: &dyn KvStore, id: SubsystemId) -> Result<Option<BlockHeader>, SubsystemError> {
    let Some(raw) = store.get(HEAD_KEY).map_err(storage_error(id))? else {
        return Ok(None);
    };
    let height: [u8; 8] = raw
        .as_slice()
        .try_into()
        .map_err(|_| SubsystemError::new(id, "corrupt head pointer"))?;
    read_header(store, u64::from_be_bytes(height), id)
}

fn write_header(
    store: &dyn KvStore,
    header: &BlockHeader,
    id: SubsystemId,
) -> Result<(), SubsystemError> {
    let raw = serde_json::to_vec(header).map_err(|e| SubsystemError::new(id, e.to_string()))?;
    store
        .put(&header_key(header.height), &raw)
        .map_err(storage_error(id))?;
    store
        .put(HEAD_KEY, &header.height.to_be_bytes())
        .map_err(storage_error(id))
}

/// Genesis header written on first start of an empty chain.
pub fn genesis_header() -> BlockHeader {
    BlockHeader {
        height: 0,
        parent_hash: [0u8; 32],
        proposer: NodeId([0u8; 32]),
        timestamp_ms: 0,
        tx_count: 0,
    }
}

/// Read side of the chain.
pub struct LocalBlockReader {
    store: Arc<dyn KvStore>,
}

impl LocalBlockReader {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Subsystem for LocalBlockReader {
    fn id(&self) -> SubsystemId {
        SubsystemId::BlockReader
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        match self.head()? {
            Some(head) => info!(height = head.height, "[chain] Head loaded"),
            None => {
                write_header(self.store.as_ref(), &genesis_header(), self.id())?;
                info!("[chain] Genesis header stored");
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        Ok(())
    }
}

impl BlockReader for LocalBlockReader {
    fn head(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        read_head(self.store.as_ref(), SubsystemId::BlockReader)
    }

    fn header(&self, height: u64) -> Result<Option<BlockHeader>, SubsystemError> {
        read_header(self.store.as_ref(), height, SubsystemId::BlockReader)
    }
}

/// Write side of the chain. Every header passes consensus and every
/// transaction passes its application before the header is stored.
///
/// Syncer and packer both write through here, so this is where they meet
/// the application registry.
pub struct LocalBlockWriter {
    store: Arc<dyn KvStore>,
    reader: Arc<dyn BlockReader>,
    consensus: Arc<dyn Consensus>,
    apps: Arc<Apps>,
}

impl LocalBlockWriter {
    pub fn new(
        store: Arc<dyn KvStore>,
        reader: Arc<dyn BlockReader>,
        consensus: Arc<dyn Consensus>,
        apps: Arc<Apps>,
    ) -> Self {
        Self {
            store,
            reader,
            consensus,
            apps,
        }
    }

    fn reject(message: String) -> SubsystemError {
        SubsystemError::new(SubsystemId::BlockWriter, message)
    }
}

impl BlockWriter for LocalBlockWriter {
    fn insert_block(
        &self,
        header: BlockHeader,
        txs: &[Transaction],
    ) -> Result<(), SubsystemError> {
        let head = self.reader.head()?;
        let expected = head.as_ref().map_or(0, |h| h.height + 1);
        if header.height != expected {
            return Err(Self::reject(format!(
                "expected height {expected}, got {}",
                header.height
            )));
        }
        if header.tx_count as usize != txs.len() {
            return Err(Self::reject(format!(
                "header {} declares {} transactions, got {}",
                header.height,
                header.tx_count,
                txs.len()
            )));
        }

        self.consensus.verify_header(head.as_ref(), &header)?;
        for tx in txs {
            self.apps
                .validate(tx)
                .map_err(|e| Self::reject(format!("block {}: {}", header.height, e.message)))?;
        }
        write_header(self.store.as_ref(), &header, SubsystemId::BlockWriter)?;
        debug!(height = header.height, txs = header.tx_count, "[chain] Block inserted");
        Ok(())
    }
}

/// Reader and writer behind one handle.
pub struct LocalBlockReadWriter {
    reader: Arc<dyn BlockReader>,
    writer: Arc<dyn BlockWriter>,
}

impl LocalBlockReadWriter {
    pub fn new(reader: Arc<dyn BlockReader>, writer: Arc<dyn BlockWriter>) -> Self {
        Self { reader, writer }
    }
}

impl BlockReadWriter for LocalBlockReadWriter {
    fn head(&self) -> Result<Option<BlockHeader>, SubsystemError> {
        self.reader.head()
    }

    fn header(&self, height: u64) -> Result<Option<BlockHeader>, SubsystemError> {
        self.reader.header(height)
    }

    fn insert_block(
        &self,
        header: BlockHeader,
        txs: &[Transaction],
    ) -> Result<(), SubsystemError> {
        self.writer.insert_block(header, txs)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::dispatch::Application;
    use crate::adapters::local::consensus::tests::solo;
    use crate::adapters::ports::TxType;
    use crate::adapters::storage::MemoryStore;

    /// Solo-consensus read-writer over a fresh in-memory block store,
    /// validating transactions with `apps`.
    pub(crate) fn memory_read_writer_with(apps: Arc<Apps>) -> Arc<dyn BlockReadWriter> {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new("blockdata"));
        let reader: Arc<dyn BlockReader> = Arc::new(LocalBlockReader::new(Arc::clone(&store)));
        let consensus = solo(Arc::clone(&reader));
        let writer = Arc::new(LocalBlockWriter::new(
            store,
            Arc::clone(&reader),
            consensus,
            apps,
        ));
        Arc::new(LocalBlockReadWriter::new(reader, writer))
    }

    pub(crate) fn memory_read_writer() -> Arc<dyn BlockReadWriter> {
        memory_read_writer_with(Arc::new(Apps::new(NodeId([1u8; 32]))))
    }

    struct NonEmpty;

    impl Application for NonEmpty {
        fn tx_type(&self) -> TxType {
            TxType(3)
        }

        fn validate(&self, tx: &Transaction) -> Result<(), SubsystemError> {
            if tx.payload.is_empty() {
                return Err(SubsystemError::new(SubsystemId::TxPools, "empty payload"));
            }
            Ok(())
        }
    }

    fn child_of(parent: &BlockHeader, tx_count: u32) -> BlockHeader {
        BlockHeader {
            height: parent.height + 1,
            parent_hash: parent.hash(),
            proposer: NodeId([1u8; 32]),
            timestamp_ms: parent.timestamp_ms + 5,
            tx_count,
        }
    }

    #[tokio::test]
    async fn test_reader_writes_genesis_on_first_start() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new("blockdata"));
        let reader = LocalBlockReader::new(Arc::clone(&store));
        assert_eq!(reader.head().unwrap(), None);

        reader.start().await.unwrap();
        assert_eq!(reader.head().unwrap(), Some(genesis_header()));

        // Restart keeps the existing head
        reader.start().await.unwrap();
        assert_eq!(reader.head().unwrap().map(|h| h.height), Some(0));
    }

    #[test]
    fn test_writer_enforces_height_and_parent() {
        let read_writer = memory_read_writer();
        read_writer.insert_block(genesis_header(), &[]).unwrap();

        let genesis = genesis_header();
        let next = child_of(&genesis, 0);
        read_writer.insert_block(next.clone(), &[]).unwrap();
        assert_eq!(read_writer.head().unwrap(), Some(next.clone()));
        assert_eq!(read_writer.header(0).unwrap(), Some(genesis));

        let gap = BlockHeader {
            height: 5,
            ..next.clone()
        };
        let err = read_writer.insert_block(gap, &[]).unwrap_err();
        assert_eq!(err.subsystem, SubsystemId::BlockWriter);

        let bad_parent = BlockHeader {
            height: 2,
            parent_hash: [7u8; 32],
            ..next
        };
        let err = read_writer.insert_block(bad_parent, &[]).unwrap_err();
        assert_eq!(err.subsystem, SubsystemId::Consensus);
    }

    #[test]
    fn test_writer_validates_transactions_with_apps() {
        let apps = Arc::new(Apps::new(NodeId([1u8; 32])));
        apps.register(Arc::new(NonEmpty));
        let read_writer = memory_read_writer_with(apps);
        let genesis = genesis_header();
        read_writer.insert_block(genesis.clone(), &[]).unwrap();

        let note = |payload: &[u8]| Transaction {
            tx_type: TxType(3),
            payload: payload.to_vec(),
        };

        // Declared count must match the body
        let err = read_writer
            .insert_block(child_of(&genesis, 2), &[note(b"a")])
            .unwrap_err();
        assert_eq!(err.subsystem, SubsystemId::BlockWriter);

        // A transaction its application rejects keeps the block out
        let err = read_writer
            .insert_block(child_of(&genesis, 1), &[note(b"")])
            .unwrap_err();
        assert!(err.message.contains("empty payload"));

        // So does one with no application at all
        let unknown = Transaction {
            tx_type: TxType(9),
            payload: vec![1],
        };
        assert!(read_writer
            .insert_block(child_of(&genesis, 1), &[unknown])
            .is_err());
        assert_eq!(read_writer.head().unwrap(), Some(genesis.clone()));

        let block = child_of(&genesis, 2);
        read_writer
            .insert_block(block.clone(), &[note(b"a"), note(b"b")])
            .unwrap();
        assert_eq!(read_writer.head().unwrap(), Some(block));
    }
}
