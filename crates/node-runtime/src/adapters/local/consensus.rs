//! Built-in consensus engines.
//!
//! - `solo`: any proposer, headers only have to extend their parent.
//! - `authority`: proposer must be in the configured validator set.
//!
//! The first start records the algorithm under `consensus/algorithm` in the
//! state store; later starts refuse a different one.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::adapters::ports::{BlockHeader, BlockReader, Broadcaster, Consensus, NodeId};
use crate::adapters::storage::KvStore;
use crate::container::config::{ConsensusAlgorithm, ConsensusConfig};
use crate::error::ConfigError;
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

const ALGORITHM_KEY: &[u8] = b"consensus/algorithm";

/// Topic announcing the engine to peers on start.
pub const READY_TOPIC: &str = "consensus/ready";

pub struct LocalConsensus {
    algorithm: ConsensusAlgorithm,
    validators: HashSet<NodeId>,
    local: NodeId,
    reader: Arc<dyn BlockReader>,
    broadcaster: Arc<dyn Broadcaster>,
    state: Arc<dyn KvStore>,
}

impl LocalConsensus {
    pub fn new(
        algorithm: ConsensusAlgorithm,
        config: &ConsensusConfig,
        local: NodeId,
        reader: Arc<dyn BlockReader>,
        broadcaster: Arc<dyn Broadcaster>,
        state: Arc<dyn KvStore>,
    ) -> Result<Self, ConfigError> {
        let validators = config
            .validators
            .iter()
            .map(|raw| {
                raw.parse::<NodeId>().map_err(|e| ConfigError::Invalid {
                    field: "chain.consensus.validators",
                    reason: format!("{raw:?}: {e}"),
                })
            })
            .collect::<Result<HashSet<_>, _>>()?;

        if algorithm == ConsensusAlgorithm::Authority && validators.is_empty() {
            return Err(ConfigError::Invalid {
                field: "chain.consensus.validators",
                reason: "authority consensus needs at least one validator".to_string(),
            });
        }

        Ok(Self {
            algorithm,
            validators,
            local,
            reader,
            broadcaster,
            state,
        })
    }

    /// Whether this node may propose blocks.
    pub fn is_proposer(&self) -> bool {
        match self.algorithm {
            ConsensusAlgorithm::Solo => true,
            ConsensusAlgorithm::Authority => self.validators.contains(&self.local),
        }
    }

    fn reject(&self, message: impl Into<String>) -> SubsystemError {
        SubsystemError::new(SubsystemId::Consensus, message)
    }

    /// Record the algorithm on first start; refuse to run a chain that was
    /// started under a different one.
    fn check_recorded_algorithm(&self) -> Result<(), SubsystemError> {
        let name = self.algorithm.name();
        let recorded = self
            .state
            .get(ALGORITHM_KEY)
            .map_err(|e| self.reject(e.to_string()))?;
        match recorded {
            None => self
                .state
                .put(ALGORITHM_KEY, name.as_bytes())
                .map_err(|e| self.reject(e.to_string())),
            Some(raw) if raw == name.as_bytes() => Ok(()),
            Some(raw) => Err(self.reject(format!(
                "chain runs {} consensus, configured {name}",
                String::from_utf8_lossy(&raw)
            ))),
        }
    }
}

#[async_trait]
impl Subsystem for LocalConsensus {
    fn id(&self) -> SubsystemId {
        SubsystemId::Consensus
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.check_recorded_algorithm()?;
        let head = self.reader.head()?.map_or(0, |h| h.height);
        // Peers may not be connected yet; the announcement is best effort
        if let Err(e) = self
            .broadcaster
            .broadcast(READY_TOPIC, self.algorithm.name().as_bytes())
        {
            warn!(error = %e, "[consensus] Ready announcement failed");
        }
        info!(
            algorithm = self.algorithm.name(),
            proposer = self.is_proposer(),
            head,
            "[consensus] Engine ready"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        Ok(())
    }
}

impl Consensus for LocalConsensus {
    fn algorithm(&self) -> &str {
        self.algorithm.name()
    }

    fn verify_header(
        &self,
        parent: Option<&BlockHeader>,
        header: &BlockHeader,
    ) -> Result<(), SubsystemError> {
        match parent {
            None if header.height != 0 => {
                return Err(self.reject(format!("block {} has no parent", header.height)));
            }
            None => {}
            Some(parent) => {
                if header.height != parent.height + 1 {
                    return Err(self.reject(format!(
                        "height {} does not follow {}",
                        header.height, parent.height
                    )));
                }
                if header.parent_hash != parent.hash() {
                    return Err(self.reject(format!("parent hash mismatch at {}", header.height)));
                }
                if header.timestamp_ms < parent.timestamp_ms {
                    return Err(self.reject(format!("timestamp regressed at {}", header.height)));
                }
            }
        }

        if self.algorithm == ConsensusAlgorithm::Authority
            && header.height > 0
            && !self.validators.contains(&header.proposer)
        {
            return Err(self.reject(format!(
                "proposer {} is not a validator",
                header.proposer.short()
            )));
        }
        Ok(())
    }

    fn prepare_header(
        &self,
        parent: Option<&BlockHeader>,
        tx_count: u32,
    ) -> Result<BlockHeader, SubsystemError> {
        if !self.is_proposer() {
            return Err(self.reject("local node is not a validator"));
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        Ok(match parent {
            Some(parent) => BlockHeader {
                height: parent.height + 1,
                parent_hash: parent.hash(),
                proposer: self.local,
                timestamp_ms: now.max(parent.timestamp_ms),
                tx_count,
            },
            None => BlockHeader {
                height: 0,
                parent_hash: [0u8; 32],
                proposer: self.local,
                timestamp_ms: now,
                tx_count,
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::local::chain::LocalBlockReader;
    use crate::adapters::storage::MemoryStore;
    use parking_lot::Mutex;

    /// Broadcaster that remembers every topic it was asked to send.
    #[derive(Default)]
    pub(crate) struct Topics(pub(crate) Mutex<Vec<String>>);

    impl Broadcaster for Topics {
        fn broadcast(&self, topic: &str, _payload: &[u8]) -> Result<usize, SubsystemError> {
            self.0.lock().push(topic.to_string());
            Ok(0)
        }
    }

    fn reader() -> Arc<dyn BlockReader> {
        Arc::new(LocalBlockReader::new(Arc::new(MemoryStore::new("blockdata"))))
    }

    fn engine(
        algorithm: ConsensusAlgorithm,
        config: &ConsensusConfig,
        local: NodeId,
        state: Arc<dyn KvStore>,
    ) -> Result<LocalConsensus, ConfigError> {
        LocalConsensus::new(
            algorithm,
            config,
            local,
            reader(),
            Arc::new(Topics::default()),
            state,
        )
    }

    /// Solo engine over `reader`, with throwaway state.
    pub(crate) fn solo(reader: Arc<dyn BlockReader>) -> Arc<LocalConsensus> {
        Arc::new(
            LocalConsensus::new(
                ConsensusAlgorithm::Solo,
                &ConsensusConfig::default(),
                NodeId([1u8; 32]),
                reader,
                Arc::new(Topics::default()),
                Arc::new(MemoryStore::new("statedata")),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_solo_prepare_then_verify() {
        let consensus = solo(reader());

        let genesis = consensus.prepare_header(None, 0).unwrap();
        consensus.verify_header(None, &genesis).unwrap();

        let next = consensus.prepare_header(Some(&genesis), 3).unwrap();
        assert_eq!(next.height, 1);
        consensus.verify_header(Some(&genesis), &next).unwrap();

        let mut forged = next.clone();
        forged.parent_hash = [9u8; 32];
        assert!(consensus.verify_header(Some(&genesis), &forged).is_err());
    }

    #[test]
    fn test_authority_requires_validators() {
        let config = ConsensusConfig {
            name: "authority".to_string(),
            ..ConsensusConfig::default()
        };
        let err = engine(
            ConsensusAlgorithm::Authority,
            &config,
            NodeId([1u8; 32]),
            Arc::new(MemoryStore::new("statedata")),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "chain.consensus.validators", .. }
        ));
    }

    #[test]
    fn test_authority_rejects_foreign_proposer() {
        let validator = NodeId([1u8; 32]);
        let config = ConsensusConfig {
            name: "authority".to_string(),
            validators: vec![validator.to_string()],
            ..ConsensusConfig::default()
        };
        let state: Arc<dyn KvStore> = Arc::new(MemoryStore::new("statedata"));
        let consensus =
            engine(ConsensusAlgorithm::Authority, &config, validator, Arc::clone(&state)).unwrap();
        let genesis = consensus.prepare_header(None, 0).unwrap();

        let mut foreign = consensus.prepare_header(Some(&genesis), 0).unwrap();
        foreign.proposer = NodeId([2u8; 32]);
        assert!(consensus.verify_header(Some(&genesis), &foreign).is_err());

        let observer =
            engine(ConsensusAlgorithm::Authority, &config, NodeId([5u8; 32]), state).unwrap();
        assert!(!observer.is_proposer());
        assert!(observer.prepare_header(Some(&genesis), 0).is_err());
    }

    #[tokio::test]
    async fn test_start_records_algorithm_and_announces() {
        let state: Arc<dyn KvStore> = Arc::new(MemoryStore::new("statedata"));
        let topics = Arc::new(Topics::default());
        let consensus = LocalConsensus::new(
            ConsensusAlgorithm::Solo,
            &ConsensusConfig::default(),
            NodeId([1u8; 32]),
            reader(),
            Arc::clone(&topics) as Arc<dyn Broadcaster>,
            Arc::clone(&state),
        )
        .unwrap();

        consensus.start().await.unwrap();
        assert_eq!(state.get(ALGORITHM_KEY).unwrap(), Some(b"solo".to_vec()));
        assert_eq!(*topics.0.lock(), vec![READY_TOPIC.to_string()]);

        // Restarting under the same algorithm is fine
        consensus.start().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_refuses_chain_recorded_under_other_algorithm() {
        let state: Arc<dyn KvStore> = Arc::new(MemoryStore::new("statedata"));
        state.put(ALGORITHM_KEY, b"authority").unwrap();

        let consensus = engine(
            ConsensusAlgorithm::Solo,
            &ConsensusConfig::default(),
            NodeId([1u8; 32]),
            Arc::clone(&state),
        )
        .unwrap();
        let err = consensus.start().await.unwrap_err();
        assert_eq!(err.subsystem, SubsystemId::Consensus);
        assert!(err.to_string().contains("authority"));
        assert_eq!(state.get(ALGORITHM_KEY).unwrap(), Some(b"authority".to_vec()));
    }
}
