//! Transport Port and In-Memory Network
//!
//! Edges talk through the [`Transport`] trait. The in-memory implementation
//! routes messages over tokio channels keyed by [`NodeAddr`], optionally
//! delaying delivery to emulate propagation latency, and counts every
//! message by kind so tests can assert on round trips.
//!
//! ```text
//!   send(dst, msg) ──▶ endpoints[dst] ──▶ mpsc ──▶ Mailbox::recv(timeout)
//!                        (DashMap)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::message::{Message, MessageKind, NodeAddr, NodeId, DISPATCHER_PORT};
use crate::error::{Error, Result};

type Endpoints = DashMap<NodeAddr, mpsc::Sender<Message>>;

// =============================================================================
// Port
// =============================================================================

/// Message transport between clients and edges
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `message` to `destination`; fire-and-forget
    async fn send(&self, destination: NodeAddr, message: Message) -> Result<()>;

    /// Bind a specific address (an edge dispatcher)
    fn bind(&self, addr: NodeAddr) -> Result<Mailbox>;

    /// Open a reply mailbox on `node` with a fresh port
    fn open_mailbox(&self, node: NodeId) -> Result<Mailbox>;
}

// =============================================================================
// Mailbox
// =============================================================================

/// Receiving end of one bound address; unbinds on drop
pub struct Mailbox {
    addr: NodeAddr,
    rx: mpsc::Receiver<Message>,
    endpoints: Weak<Endpoints>,
}

impl Mailbox {
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Wait up to `timeout` for the next message
    pub async fn recv(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if let Some(endpoints) = self.endpoints.upgrade() {
            endpoints.remove(&self.addr);
        }
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox").field("addr", &self.addr).finish()
    }
}

// =============================================================================
// In-Memory Network
// =============================================================================

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Per-mailbox channel capacity
    pub channel_capacity: usize,
    /// One-way propagation delay
    pub latency: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            latency: Duration::ZERO,
        }
    }
}

/// Channel-backed transport shared by every node of a cluster
pub struct InMemoryNetwork {
    config: NetworkConfig,
    endpoints: Arc<Endpoints>,
    next_port: AtomicU32,
    sent: DashMap<MessageKind, AtomicU64>,
    /// Messages of a kind to silently drop, for fault injection
    drops: Mutex<HashMap<MessageKind, u64>>,
    dropped: AtomicU64,
}

impl InMemoryNetwork {
    pub fn new(config: NetworkConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            endpoints: Arc::new(DashMap::new()),
            next_port: AtomicU32::new(DISPATCHER_PORT + 1),
            sent: DashMap::new(),
            drops: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        })
    }

    /// Messages of `kind` accepted for delivery so far
    pub fn sent_count(&self, kind: MessageKind) -> u64 {
        self.sent
            .get(&kind)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Messages of every kind accepted for delivery so far
    pub fn total_sent(&self) -> u64 {
        self.sent
            .iter()
            .map(|c| c.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Messages discarded by [`drop_next`](Self::drop_next)
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Silently lose the next `count` messages of `kind`
    pub fn drop_next(&self, kind: MessageKind, count: u64) {
        *self.drops.lock().entry(kind).or_insert(0) += count;
    }

    pub fn is_bound(&self, addr: &NodeAddr) -> bool {
        self.endpoints.contains_key(addr)
    }

    fn should_drop(&self, kind: MessageKind) -> bool {
        let mut drops = self.drops.lock();
        match drops.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn register(&self, addr: NodeAddr) -> Result<Mailbox> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        match self.endpoints.entry(addr) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::Transport(format!("{} is already bound", addr)));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }
        trace!("Bound {}", addr);
        Ok(Mailbox {
            addr,
            rx,
            endpoints: Arc::downgrade(&self.endpoints),
        })
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn send(&self, destination: NodeAddr, message: Message) -> Result<()> {
        let kind = message.kind();
        // Clone the sender out so no shard lock is held across an await
        let sender = self
            .endpoints
            .get(&destination)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Transport(format!("{} is not reachable", destination)))?;

        self.sent
            .entry(kind)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);

        if self.should_drop(kind) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropping {:?} to {}", kind, destination);
            return Ok(());
        }

        if self.config.latency.is_zero() {
            return sender
                .send(message)
                .await
                .map_err(|_| Error::Transport(format!("{} closed", destination)));
        }

        let latency = self.config.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if sender.send(message).await.is_err() {
                trace!("{} closed before delayed delivery", destination);
            }
        });
        Ok(())
    }

    fn bind(&self, addr: NodeAddr) -> Result<Mailbox> {
        self.register(addr)
    }

    fn open_mailbox(&self, node: NodeId) -> Result<Mailbox> {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        self.register(NodeAddr { node, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key_value::Key;
    use crate::network::message::Payload;
    use assert_matches::assert_matches;

    fn get(source: NodeAddr, key: &str) -> Message {
        Message::request(
            source,
            Payload::LocalGetRequest {
                key: Key::from(key),
            },
            false,
        )
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let network = InMemoryNetwork::new(NetworkConfig::default());
        let mut edge = network.bind(NodeAddr::edge(0)).unwrap();
        let client = network.open_mailbox(NodeId::Client(0)).unwrap();

        network
            .send(NodeAddr::edge(0), get(client.addr(), "k"))
            .await
            .unwrap();
        let msg = edge.recv(Duration::from_millis(100)).await.unwrap();
        assert_eq!(msg.source, client.addr());
        assert_eq!(network.sent_count(MessageKind::LocalGetRequest), 1);
        assert_eq!(network.total_sent(), 1);
    }

    #[tokio::test]
    async fn test_double_bind_and_unbind_on_drop() {
        let network = InMemoryNetwork::new(NetworkConfig::default());
        let mailbox = network.bind(NodeAddr::edge(1)).unwrap();
        assert_matches!(network.bind(NodeAddr::edge(1)), Err(Error::Transport(_)));

        drop(mailbox);
        assert!(!network.is_bound(&NodeAddr::edge(1)));
        assert_matches!(
            network
                .send(NodeAddr::edge(1), get(NodeAddr::edge(0), "k"))
                .await,
            Err(Error::Transport(_))
        );
    }

    #[tokio::test]
    async fn test_drop_next_loses_messages() {
        let network = InMemoryNetwork::new(NetworkConfig::default());
        let mut edge = network.bind(NodeAddr::edge(0)).unwrap();
        network.drop_next(MessageKind::LocalGetRequest, 1);

        let src = NodeAddr::edge(9);
        network.send(NodeAddr::edge(0), get(src, "a")).await.unwrap();
        network.send(NodeAddr::edge(0), get(src, "b")).await.unwrap();

        let msg = edge.recv(Duration::from_millis(100)).await.unwrap();
        assert_matches!(msg.payload, Payload::LocalGetRequest { ref key } if key == &Key::from("b"));
        assert!(edge.recv(Duration::from_millis(20)).await.is_none());
        assert_eq!(network.dropped_count(), 1);
    }

    #[tokio::test]
    async fn test_latency_delays_delivery() {
        let network = InMemoryNetwork::new(NetworkConfig {
            latency: Duration::from_millis(30),
            ..Default::default()
        });
        let mut edge = network.bind(NodeAddr::edge(0)).unwrap();
        network
            .send(NodeAddr::edge(0), get(NodeAddr::edge(1), "k"))
            .await
            .unwrap();
        assert!(edge.recv(Duration::from_millis(5)).await.is_none());
        assert!(edge.recv(Duration::from_millis(200)).await.is_some());
    }
}
