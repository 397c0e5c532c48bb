//! Loopback networking, broadcaster and permission manager.
//!
//! Nothing here opens a socket. Peers are attached explicitly with
//! [`LocalNetwork::connect`], which is enough to drive a single-process node
//! and the handshake/sync paths in tests.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::adapters::dispatch::ApiRegistry;
use crate::adapters::ports::{BlockReadWriter, Broadcaster, Handshake, Network, NodeId};
use crate::container::config::{NetworkConfig, PermissionConfig};
use crate::error::ConfigError;
use crate::registry::{Subsystem, SubsystemError, SubsystemId};

/// In-process network endpoint.
pub struct LocalNetwork {
    listen_addr: SocketAddr,
    max_peers: usize,
    apis: Arc<ApiRegistry>,
    protocols: RwLock<Vec<String>>,
    peers: RwLock<Vec<NodeId>>,
    running: AtomicBool,
}

impl LocalNetwork {
    pub fn new(config: &NetworkConfig, apis: Arc<ApiRegistry>) -> Result<Self, ConfigError> {
        let listen_addr = config
            .listen_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                field: "network.listen_addr",
                reason: format!("{:?}: {e}", config.listen_addr),
            })?;
        Ok(Self {
            listen_addr,
            max_peers: config.max_peers,
            apis,
            protocols: RwLock::new(Vec::new()),
            peers: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn protocols(&self) -> Vec<String> {
        self.protocols.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Attach a peer. Fails when stopped or at `max_peers`.
    pub fn connect(&self, peer: NodeId) -> Result<(), SubsystemError> {
        if !self.is_running() {
            return Err(SubsystemError::new(SubsystemId::Network, "not running"));
        }
        let mut peers = self.peers.write();
        if peers.contains(&peer) {
            return Ok(());
        }
        if peers.len() >= self.max_peers {
            return Err(SubsystemError::new(
                SubsystemId::Network,
                format!("peer limit {} reached", self.max_peers),
            ));
        }
        peers.push(peer);
        debug!(peer = %peer.short(), "[network] Peer connected");
        Ok(())
    }
}

#[async_trait]
impl Subsystem for LocalNetwork {
    fn id(&self) -> SubsystemId {
        SubsystemId::Network
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        for namespace in self.apis.namespaces() {
            self.register_protocol(namespace);
        }
        self.running.store(true, Ordering::SeqCst);
        info!(listen = %self.listen_addr, "[network] Listening");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.running.store(false, Ordering::SeqCst);
        self.peers.write().clear();
        Ok(())
    }
}

impl Network for LocalNetwork {
    fn register_protocol(&self, name: &str) {
        let mut protocols = self.protocols.write();
        if !protocols.iter().any(|p| p == name) {
            protocols.push(name.to_string());
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.peers.read().clone()
    }

    fn send_all(&self, topic: &str, payload: &[u8]) -> Result<usize, SubsystemError> {
        if !self.is_running() {
            return Err(SubsystemError::new(SubsystemId::Network, "not running"));
        }
        let reached = self.peers.read().len();
        debug!(topic, bytes = payload.len(), reached, "[network] Sent");
        Ok(reached)
    }
}

/// Fans messages out over the network, scoped to the chain ID.
pub struct LocalBroadcaster {
    network: Arc<dyn Network>,
    chain_id: u64,
}

impl LocalBroadcaster {
    pub fn new(network: Arc<dyn Network>, chain_id: u64) -> Self {
        Self { network, chain_id }
    }
}

impl Broadcaster for LocalBroadcaster {
    fn broadcast(&self, topic: &str, payload: &[u8]) -> Result<usize, SubsystemError> {
        self.network
            .send_all(&format!("{}/{topic}", self.chain_id), payload)
    }
}

/// Permission manager backed by the `[permission]` allow list.
pub struct LocalHandshake {
    network: Arc<dyn Network>,
    read_writer: Arc<dyn BlockReadWriter>,
    broadcaster: Arc<dyn Broadcaster>,
    /// `None` means open membership.
    allowed: Option<HashSet<NodeId>>,
}

impl LocalHandshake {
    pub fn new(
        config: &PermissionConfig,
        network: Arc<dyn Network>,
        read_writer: Arc<dyn BlockReadWriter>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, ConfigError> {
        let allowed = if config.allowed_peers.is_empty() {
            None
        } else {
            let peers = config
                .allowed_peers
                .iter()
                .map(|raw| {
                    raw.parse::<NodeId>().map_err(|e| ConfigError::Invalid {
                        field: "permission.allowed_peers",
                        reason: format!("{raw:?}: {e}"),
                    })
                })
                .collect::<Result<HashSet<_>, _>>()?;
            Some(peers)
        };
        Ok(Self {
            network,
            read_writer,
            broadcaster,
            allowed,
        })
    }
}

#[async_trait]
impl Subsystem for LocalHandshake {
    fn id(&self) -> SubsystemId {
        SubsystemId::Handshake
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        self.network.register_protocol("handshake");

        // Announce our head so peers can decide whether to sync from us
        let height = self.read_writer.head()?.map_or(0, |h| h.height);
        if let Err(e) = self.broadcaster.broadcast("status", &height.to_be_bytes()) {
            warn!(error = %e, "[handshake] Status announcement failed");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        Ok(())
    }
}

impl Handshake for LocalHandshake {
    fn is_permitted(&self, peer: &NodeId) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(peer))
    }
}
