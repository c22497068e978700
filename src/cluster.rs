//! Cluster Harness
//!
//! Runs N edges in one process over a shared in-memory network and cloud,
//! and hands out clients that talk to any edge.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::key_value::{Hitflag, Key, Value};
use crate::cloud::{CloudBackend, CloudConfig, InMemoryCloud};
use crate::edge::{EdgeConfig, EdgeHandle, EdgeNode, EdgeStatsSnapshot};
use crate::error::{Error, Result};
use crate::network::{
    InMemoryNetwork, Mailbox, Message, NetworkConfig, NodeAddr, NodeId, Payload, Transport,
};

// =============================================================================
// Configuration
// =============================================================================

/// Cluster-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub edgecnt: u32,
    /// Template for every edge; index and count are filled in per edge
    pub edge: EdgeConfig,
    /// One-way network delay in microseconds
    pub network_latency_us: u64,
    pub channel_capacity: usize,
    /// Size the cloud reports for keys never written
    pub cloud_default_object_size: u32,
    /// How long a client waits for a response
    pub client_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            edgecnt: 4,
            edge: EdgeConfig::default(),
            network_latency_us: 0,
            channel_capacity: 1000,
            cloud_default_object_size: 1024,
            client_timeout_ms: 5000,
        }
    }
}

impl ClusterConfig {
    /// Load from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.edgecnt == 0 {
            return Err(Error::Config("edgecnt must be at least 1".to_string()));
        }
        if self.client_timeout_ms == 0 {
            return Err(Error::Config("client_timeout_ms must be positive".to_string()));
        }
        self.edge_config(0).validate()
    }

    pub fn edge_config(&self, edge_idx: u32) -> EdgeConfig {
        EdgeConfig {
            edge_idx,
            edgecnt: self.edgecnt,
            ..self.edge.clone()
        }
    }
}

// =============================================================================
// Cluster
// =============================================================================

/// A running set of edges
pub struct Cluster {
    config: ClusterConfig,
    network: Arc<InMemoryNetwork>,
    cloud: Arc<dyn CloudBackend>,
    edges: Vec<EdgeHandle>,
    next_client: AtomicU32,
}

impl Cluster {
    /// Start every edge with an in-memory cloud
    pub fn start(config: ClusterConfig) -> Result<Self> {
        let cloud = Arc::new(InMemoryCloud::new(CloudConfig {
            default_object_size: config.cloud_default_object_size,
            ..Default::default()
        }));
        Self::start_with_cloud(config, cloud)
    }

    /// Start every edge against the given cloud
    pub fn start_with_cloud(config: ClusterConfig, cloud: Arc<dyn CloudBackend>) -> Result<Self> {
        config.validate()?;
        let network = InMemoryNetwork::new(NetworkConfig {
            channel_capacity: config.channel_capacity,
            latency: Duration::from_micros(config.network_latency_us),
        });

        let mut edges = Vec::with_capacity(config.edgecnt as usize);
        for edge_idx in 0..config.edgecnt {
            let transport: Arc<dyn Transport> = network.clone();
            let edge = EdgeNode::new(config.edge_config(edge_idx), transport, Arc::clone(&cloud))?;
            edges.push(edge.start()?);
        }
        info!(
            "Cluster started: {} edges, policy {}",
            config.edgecnt, config.edge.policy
        );

        Ok(Self {
            config,
            network,
            cloud,
            edges,
            next_client: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn edgecnt(&self) -> u32 {
        self.config.edgecnt
    }

    pub fn edge(&self, edge_idx: u32) -> &Arc<EdgeNode> {
        self.edges[edge_idx as usize].edge()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Arc<EdgeNode>> {
        self.edges.iter().map(|h| h.edge())
    }

    pub fn network(&self) -> &Arc<InMemoryNetwork> {
        &self.network
    }

    pub fn cloud(&self) -> &Arc<dyn CloudBackend> {
        &self.cloud
    }

    /// A new client with its own reply mailbox
    pub fn client(&self) -> Result<Client> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let mailbox = self.network.open_mailbox(NodeId::Client(id))?;
        Ok(Client {
            mailbox,
            network: Arc::clone(&self.network),
            timeout: Duration::from_millis(self.config.client_timeout_ms),
        })
    }

    pub fn stats(&self) -> Vec<EdgeStatsSnapshot> {
        self.edges().map(|e| e.stats_snapshot()).collect()
    }

    /// Stop every edge, wait for them, and surface the first fatal error
    pub async fn shutdown(self) -> Result<()> {
        for edge in self.edges() {
            edge.stop();
        }
        let mut first_error = None;
        for handle in self.edges {
            if let Err(e) = handle.shutdown().await {
                warn!("Edge shutdown reported: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// What an edge answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientResponse {
    pub value: Option<Value>,
    pub hitflag: Hitflag,
    pub edge_idx: u32,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
}

/// Issues requests to edges and waits for their responses
pub struct Client {
    mailbox: Mailbox,
    network: Arc<InMemoryNetwork>,
    timeout: Duration,
}

impl Client {
    pub async fn get(&mut self, edge_idx: u32, key: impl Into<Key>) -> Result<ClientResponse> {
        let payload = Payload::LocalGetRequest { key: key.into() };
        self.request(edge_idx, payload).await
    }

    pub async fn put(
        &mut self,
        edge_idx: u32,
        key: impl Into<Key>,
        value: Value,
    ) -> Result<ClientResponse> {
        let payload = Payload::LocalPutRequest {
            key: key.into(),
            value,
        };
        self.request(edge_idx, payload).await
    }

    pub async fn del(&mut self, edge_idx: u32, key: impl Into<Key>) -> Result<ClientResponse> {
        let payload = Payload::LocalDelRequest { key: key.into() };
        self.request(edge_idx, payload).await
    }

    async fn request(&mut self, edge_idx: u32, payload: Payload) -> Result<ClientResponse> {
        let request = Message::request(self.mailbox.addr(), payload, false);
        let kind = request.kind();
        self.network
            .send(NodeAddr::edge(edge_idx), request.clone())
            .await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(response) = self.mailbox.recv(remaining).await else {
                return Err(Error::Timeout {
                    operation: format!("{:?}", kind),
                    edge_idx,
                });
            };
            if response.request_id != request.request_id {
                warn!("Client dropping stale {:?}", response.kind());
                continue;
            }
            return match response.payload {
                Payload::LocalResponse {
                    value,
                    hitflag,
                    edge_idx,
                    used_bytes,
                    capacity_bytes,
                    ..
                } => Ok(ClientResponse {
                    value,
                    hitflag,
                    edge_idx,
                    used_bytes,
                    capacity_bytes,
                }),
                other => Err(Error::invariant(format!(
                    "client expected LocalResponse, got {:?}",
                    other.kind()
                ))),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_edge_config_inherits_template() {
        let config = ClusterConfig {
            edgecnt: 3,
            edge: EdgeConfig {
                capacity_bytes: 123,
                ..Default::default()
            },
            ..Default::default()
        };
        let edge = config.edge_config(2);
        assert_eq!(edge.edge_idx, 2);
        assert_eq!(edge.edgecnt, 3);
        assert_eq!(edge.capacity_bytes, 123);
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_cluster_config() {
        let config = ClusterConfig {
            edgecnt: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("edgecoop-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"edgecnt": 2, "edge": {"policy": "sieve"}}"#).unwrap();
        let config = ClusterConfig::from_json_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.edgecnt, 2);
        assert_eq!(config.edge.policy, "sieve");
        assert_eq!(config.client_timeout_ms, 5000);
    }

    #[tokio::test]
    async fn test_single_edge_get_roundtrip() {
        let cluster = Cluster::start(ClusterConfig {
            edgecnt: 1,
            ..Default::default()
        })
        .unwrap();
        let mut client = cluster.client().unwrap();

        let first = client.get(0, "k").await.unwrap();
        assert_eq!(first.hitflag, Hitflag::GlobalMiss);
        assert_eq!(first.value, Some(Value::new(1024)));
        let second = client.get(0, "k").await.unwrap();
        assert_eq!(second.hitflag, Hitflag::LocalHit);
        assert_eq!(second.used_bytes, 1 + 1024);

        cluster.shutdown().await.unwrap();
    }
}
