//! Transport abstraction for cluster communication.
//!
//! Defines the [`Transport`] trait for pluggable implementations:
//! - In-memory channels for unit and integration testing
//! - TCP for the reliable control channel ([`crate::tcp`])
//! - UDP for best-effort heartbeats ([`crate::udp`])

use crate::message::Message;
use crate::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport abstraction.
///
/// Implementations handle serialization and the actual I/O; a failed `send`
/// surfaces as [`TransportError::Unreachable`] so the caller can mark the
/// peer dead and stage the message for replay.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a message to a target address.
    async fn send(&self, target: SocketAddr, msg: Message) -> Result<(), TransportError>;

    /// Receive the next message (blocks until one arrives).
    async fn recv(&self) -> Result<(SocketAddr, Message), TransportError>;

    /// The local address this transport is bound to.
    fn local_addr(&self) -> SocketAddr;
}

/// In-memory transport for testing.
///
/// Uses tokio channels to simulate network communication without I/O, so
/// multi-node clusters can run deterministically in one process.
pub struct InMemoryTransport {
    local_addr: SocketAddr,

    /// Channels to other nodes (address → sender).
    peers: Arc<parking_lot::RwLock<HashMap<SocketAddr, mpsc::Sender<(SocketAddr, Message)>>>>,

    /// Receiver for incoming messages.
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<(SocketAddr, Message)>>>,

    /// When set, sends silently vanish (partition simulation).
    drop_outbound: Arc<parking_lot::RwLock<bool>>,
}

impl InMemoryTransport {
    /// Create a new in-memory transport.
    ///
    /// Returns the transport and a sender that other transports use to
    /// reach it.
    pub fn new(local_addr: SocketAddr) -> (Self, mpsc::Sender<(SocketAddr, Message)>) {
        let (tx, rx) = mpsc::channel(256);
        let transport = Self {
            local_addr,
            peers: Arc::new(parking_lot::RwLock::new(HashMap::new())),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            drop_outbound: Arc::new(parking_lot::RwLock::new(false)),
        };
        (transport, tx)
    }

    /// Connect a peer's inbound sender to this transport.
    pub fn add_peer(&self, addr: SocketAddr, sender: mpsc::Sender<(SocketAddr, Message)>) {
        self.peers.write().insert(addr, sender);
    }

    /// Disconnect a peer.
    pub fn remove_peer(&self, addr: &SocketAddr) {
        self.peers.write().remove(addr);
    }

    /// Simulate a partition: when true, outbound messages are dropped.
    pub fn set_drop_outbound(&self, drop: bool) {
        *self.drop_outbound.write() = drop;
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send(&self, target: SocketAddr, msg: Message) -> Result<(), TransportError> {
        if *self.drop_outbound.read() {
            return Ok(());
        }
        let sender = {
            let peers = self.peers.read();
            peers.get(&target).cloned()
        };
        match sender {
            Some(tx) => tx
                .send((self.local_addr, msg))
                .await
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Unreachable(target.to_string())),
        }
    }

    async fn recv(&self) -> Result<(SocketAddr, Message), TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Create a fully connected mesh of in-memory transports, one per address.
pub fn create_transport_mesh(
    addrs: Vec<SocketAddr>,
) -> HashMap<SocketAddr, Arc<InMemoryTransport>> {
    let mut transports = HashMap::new();
    let mut senders = HashMap::new();

    for addr in &addrs {
        let (transport, sender) = InMemoryTransport::new(*addr);
        transports.insert(*addr, Arc::new(transport));
        senders.insert(*addr, sender);
    }

    for addr in &addrs {
        let transport = &transports[addr];
        for (peer_addr, sender) in &senders {
            if peer_addr != addr {
                transport.add_peer(*peer_addr, sender.clone());
            }
        }
    }

    transports
}
