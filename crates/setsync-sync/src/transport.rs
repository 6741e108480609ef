//! Transport abstraction for the session driver.
//!
//! A transport moves whole frames (one encoded packet each) between nodes.
//! Implementations may use TCP, WebSockets or anything else that preserves
//! frame boundaries and order.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, SyncError};

/// Identity of a node on a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derive an identity from a human-readable name.
    pub fn from_name(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    /// Generate a random node ID.
    pub fn random() -> Self {
        use rand::Rng;
        Self(rand::thread_rng().gen())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

/// Frame transport between nodes.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a frame to a specific peer.
    async fn send(&self, peer: &NodeId, frame: Bytes) -> Result<()>;

    /// Receive the next frame from any peer.
    async fn recv(&self) -> Result<(NodeId, Bytes)>;

    /// Receive with timeout.
    ///
    /// Returns `None` if the timeout expires first. A zero timeout still
    /// returns a frame that is already waiting.
    async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<(NodeId, Bytes)>>;

    /// Get the local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// Check if a specific peer is reachable.
    async fn is_connected(&self, peer: &NodeId) -> bool;
}

/// A simple in-memory transport for testing.
///
/// Uses channels to simulate frame passing between nodes.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex, RwLock};

    /// Frames buffered per node before senders wait.
    const CHANNEL_CAPACITY: usize = 1024;

    #[derive(Debug)]
    struct Envelope {
        from: NodeId,
        frame: Bytes,
    }

    /// Shared state for the memory transport network.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Create a transport connected to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Disconnect a node; later sends to it fail.
        pub async fn disconnect(&self, node_id: &NodeId) {
            self.senders.write().await.remove(node_id);
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, frame: Bytes) -> Result<()> {
            let sender = {
                let senders = self.network.senders.read().await;
                senders
                    .get(peer)
                    .cloned()
                    .ok_or_else(|| SyncError::Transport(format!("peer {} not found", peer)))?
            };
            sender
                .send(Envelope {
                    from: self.node_id,
                    frame,
                })
                .await
                .map_err(|_| SyncError::Transport(format!("peer {} disconnected", peer)))
        }

        async fn recv(&self) -> Result<(NodeId, Bytes)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Ok((envelope.from, envelope.frame)),
                None => Err(SyncError::Transport("channel closed".into())),
            }
        }

        async fn recv_timeout(&self, timeout: std::time::Duration) -> Result<Option<(NodeId, Bytes)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Ok(Some((envelope.from, envelope.frame))),
                Ok(None) => Err(SyncError::Transport("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn is_connected(&self, peer: &NodeId) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;

    #[tokio::test]
    async fn test_memory_transport_send_recv() {
        let network = MemoryNetwork::new();
        let node_a = NodeId::from_name("a");
        let node_b = NodeId::from_name("b");

        let transport_a = network.create_transport(node_a).await;
        let transport_b = network.create_transport(node_b).await;

        transport_a.send(&node_b, Bytes::from_static(b"frame")).await.unwrap();

        let (from, frame) = transport_b.recv().await.unwrap();
        assert_eq!(from, node_a);
        assert_eq!(&frame[..], b"frame");
    }

    #[tokio::test]
    async fn test_zero_timeout_returns_waiting_frame() {
        let network = MemoryNetwork::new();
        let node_a = NodeId::from_name("a");
        let node_b = NodeId::from_name("b");
        let transport_a = network.create_transport(node_a).await;
        let transport_b = network.create_transport(node_b).await;

        let idle = transport_b.recv_timeout(std::time::Duration::ZERO).await.unwrap();
        assert!(idle.is_none());

        transport_a.send(&node_b, Bytes::from_static(b"x")).await.unwrap();
        let got = transport_b.recv_timeout(std::time::Duration::ZERO).await.unwrap();
        assert_eq!(got.map(|(from, _)| from), Some(node_a));
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let network = MemoryNetwork::new();
        let node_a = NodeId::from_name("a");
        let node_b = NodeId::from_name("b");
        let transport_a = network.create_transport(node_a).await;
        assert!(!transport_a.is_connected(&node_b).await);

        let result = transport_a.send(&node_b, Bytes::new()).await;
        assert!(matches!(result, Err(SyncError::Transport(_))));

        let _transport_b = network.create_transport(node_b).await;
        assert!(transport_a.is_connected(&node_b).await);
        network.disconnect(&node_b).await;
        assert!(transport_a.send(&node_b, Bytes::new()).await.is_err());
    }

    #[test]
    fn test_node_id_from_name_is_stable() {
        assert_eq!(NodeId::from_name("peer"), NodeId::from_name("peer"));
        assert_ne!(NodeId::from_name("peer"), NodeId::from_name("other"));
        assert_eq!(NodeId::from_name("peer").to_string().len(), 16);
    }
}
