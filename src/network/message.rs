//! Message Model
//!
//! Semantic contract for everything exchanged between clients and edges. The
//! byte layout is irrelevant: messages move as Rust values through the
//! [`Transport`](super::Transport).

use std::fmt;

use uuid::Uuid;

use crate::cache::key_value::{Hitflag, Key, Value};
use crate::cooperation::{DirectoryLookup, DirectoryOp, DirectoryUpdateOutcome};
use crate::victim::VictimSyncset;

// =============================================================================
// Addressing
// =============================================================================

/// A node on the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeId {
    Edge(u32),
    Client(u32),
}

/// Port 0 of an edge is its dispatcher; other ports are reply mailboxes
pub const DISPATCHER_PORT: u32 = 0;

/// Network address: node plus port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr {
    pub node: NodeId,
    pub port: u32,
}

impl NodeAddr {
    /// Dispatcher address of an edge
    pub fn edge(edge_idx: u32) -> Self {
        Self {
            node: NodeId::Edge(edge_idx),
            port: DISPATCHER_PORT,
        }
    }

    pub fn edge_idx(&self) -> Option<u32> {
        match self.node {
            NodeId::Edge(idx) => Some(idx),
            NodeId::Client(_) => None,
        }
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            NodeId::Edge(idx) => write!(f, "edge{}:{}", idx, self.port),
            NodeId::Client(idx) => write!(f, "client{}:{}", idx, self.port),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// One directory mutation inside a (possibly batched) update request
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryUpdate {
    pub key: Key,
    pub op: DirectoryOp,
}

/// Beacon's answer for one [`DirectoryUpdate`]
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryUpdateResult {
    pub key: Key,
    pub outcome: DirectoryUpdateOutcome,
}

/// Message body
#[derive(Debug, Clone)]
pub enum Payload {
    // Client traffic
    LocalGetRequest {
        key: Key,
    },
    LocalPutRequest {
        key: Key,
        value: Value,
    },
    LocalDelRequest {
        key: Key,
    },
    LocalResponse {
        key: Key,
        value: Option<Value>,
        hitflag: Hitflag,
        edge_idx: u32,
        used_bytes: u64,
        capacity_bytes: u64,
    },

    // Directory traffic (edge -> beacon)
    DirectoryLookupRequest {
        key: Key,
    },
    DirectoryLookupResponse {
        key: Key,
        lookup: DirectoryLookup,
        syncset: Option<VictimSyncset>,
    },
    DirectoryUpdateRequest {
        updates: Vec<DirectoryUpdate>,
        syncset: Option<VictimSyncset>,
    },
    DirectoryUpdateResponse {
        results: Vec<DirectoryUpdateResult>,
        syncset: Option<VictimSyncset>,
    },
    AcquireWritelockRequest {
        key: Key,
    },
    AcquireWritelockResponse {
        key: Key,
        acquired: bool,
    },
    ReleaseWritelockRequest {
        key: Key,
    },
    ReleaseWritelockResponse {
        key: Key,
    },

    // Cooperative traffic (edge -> edge)
    RedirectedGetRequest {
        key: Key,
        syncset: Option<VictimSyncset>,
    },
    RedirectedGetResponse {
        key: Key,
        value: Option<Value>,
        is_cached: bool,
        is_valid: bool,
        syncset: Option<VictimSyncset>,
    },
    PlacementNotifyRequest {
        key: Key,
        value: Value,
        syncset: Option<VictimSyncset>,
    },
    PlacementNotifyResponse {
        key: Key,
        admitted: bool,
        syncset: Option<VictimSyncset>,
    },
    VictimFetchRequest {
        required_bytes: u64,
        syncset: Option<VictimSyncset>,
    },
    VictimFetchResponse {
        syncset: VictimSyncset,
    },
    MetadataUpdateRequest {
        key: Key,
        is_neighbor_cached: bool,
    },
    InvalidationRequest {
        key: Key,
    },
    InvalidationResponse {
        key: Key,
    },
}

/// Payload discriminant, used for routing and accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    LocalGetRequest,
    LocalPutRequest,
    LocalDelRequest,
    LocalResponse,
    DirectoryLookupRequest,
    DirectoryLookupResponse,
    DirectoryUpdateRequest,
    DirectoryUpdateResponse,
    AcquireWritelockRequest,
    AcquireWritelockResponse,
    ReleaseWritelockRequest,
    ReleaseWritelockResponse,
    RedirectedGetRequest,
    RedirectedGetResponse,
    PlacementNotifyRequest,
    PlacementNotifyResponse,
    VictimFetchRequest,
    VictimFetchResponse,
    MetadataUpdateRequest,
    InvalidationRequest,
    InvalidationResponse,
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::LocalGetRequest { .. } => MessageKind::LocalGetRequest,
            Payload::LocalPutRequest { .. } => MessageKind::LocalPutRequest,
            Payload::LocalDelRequest { .. } => MessageKind::LocalDelRequest,
            Payload::LocalResponse { .. } => MessageKind::LocalResponse,
            Payload::DirectoryLookupRequest { .. } => MessageKind::DirectoryLookupRequest,
            Payload::DirectoryLookupResponse { .. } => MessageKind::DirectoryLookupResponse,
            Payload::DirectoryUpdateRequest { .. } => MessageKind::DirectoryUpdateRequest,
            Payload::DirectoryUpdateResponse { .. } => MessageKind::DirectoryUpdateResponse,
            Payload::AcquireWritelockRequest { .. } => MessageKind::AcquireWritelockRequest,
            Payload::AcquireWritelockResponse { .. } => MessageKind::AcquireWritelockResponse,
            Payload::ReleaseWritelockRequest { .. } => MessageKind::ReleaseWritelockRequest,
            Payload::ReleaseWritelockResponse { .. } => MessageKind::ReleaseWritelockResponse,
            Payload::RedirectedGetRequest { .. } => MessageKind::RedirectedGetRequest,
            Payload::RedirectedGetResponse { .. } => MessageKind::RedirectedGetResponse,
            Payload::PlacementNotifyRequest { .. } => MessageKind::PlacementNotifyRequest,
            Payload::PlacementNotifyResponse { .. } => MessageKind::PlacementNotifyResponse,
            Payload::VictimFetchRequest { .. } => MessageKind::VictimFetchRequest,
            Payload::VictimFetchResponse { .. } => MessageKind::VictimFetchResponse,
            Payload::MetadataUpdateRequest { .. } => MessageKind::MetadataUpdateRequest,
            Payload::InvalidationRequest { .. } => MessageKind::InvalidationRequest,
            Payload::InvalidationResponse { .. } => MessageKind::InvalidationResponse,
        }
    }

    /// Key a local data request refers to; used for worker sharding
    pub fn data_request_key(&self) -> Option<&Key> {
        match self {
            Payload::LocalGetRequest { key }
            | Payload::LocalPutRequest { key, .. }
            | Payload::LocalDelRequest { key } => Some(key),
            _ => None,
        }
    }

    /// Victim syncset piggybacked on this payload, if any
    pub fn syncset(&self) -> Option<&VictimSyncset> {
        match self {
            Payload::DirectoryLookupResponse { syncset, .. }
            | Payload::DirectoryUpdateRequest { syncset, .. }
            | Payload::DirectoryUpdateResponse { syncset, .. }
            | Payload::RedirectedGetRequest { syncset, .. }
            | Payload::RedirectedGetResponse { syncset, .. }
            | Payload::PlacementNotifyRequest { syncset, .. }
            | Payload::PlacementNotifyResponse { syncset, .. }
            | Payload::VictimFetchRequest { syncset, .. } => syncset.as_ref(),
            Payload::VictimFetchResponse { syncset } => Some(syncset),
            _ => None,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// Envelope carried by the transport
#[derive(Debug, Clone)]
pub struct Message {
    /// Correlates a response with its request; responses reuse the id
    pub request_id: Uuid,
    /// Where replies go
    pub source: NodeAddr,
    /// Background traffic is excluded from foreground latency accounting
    pub is_background: bool,
    pub payload: Payload,
}

impl Message {
    /// A new request with a fresh id
    pub fn request(source: NodeAddr, payload: Payload, is_background: bool) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            source,
            is_background,
            payload,
        }
    }

    /// A response to `self`, sent from `source`
    pub fn reply(&self, source: NodeAddr, payload: Payload) -> Self {
        Self {
            request_id: self.request_id,
            source,
            is_background: self.is_background,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }
}

/// Unit handed from the dispatcher to a worker or processor
#[derive(Debug)]
pub struct CacheServerItem {
    pub message: Message,
    pub source: NodeAddr,
}

impl CacheServerItem {
    pub fn new(message: Message) -> Self {
        let source = message.source;
        Self { message, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_keeps_request_id() {
        let client = NodeAddr {
            node: NodeId::Client(0),
            port: 1,
        };
        let req = Message::request(
            client,
            Payload::LocalGetRequest {
                key: Key::from("k"),
            },
            false,
        );
        let rsp = req.reply(
            NodeAddr::edge(2),
            Payload::LocalResponse {
                key: Key::from("k"),
                value: None,
                hitflag: Hitflag::GlobalMiss,
                edge_idx: 2,
                used_bytes: 0,
                capacity_bytes: 10,
            },
        );
        assert_eq!(rsp.request_id, req.request_id);
        assert_eq!(rsp.kind(), MessageKind::LocalResponse);
        assert_eq!(req.payload.data_request_key(), Some(&Key::from("k")));
        assert!(rsp.payload.data_request_key().is_none());
    }

    #[test]
    fn test_addr_display() {
        assert_eq!(NodeAddr::edge(3).to_string(), "edge3:0");
        assert_eq!(NodeAddr::edge(3).edge_idx(), Some(3));
        let client = NodeAddr {
            node: NodeId::Client(1),
            port: 4,
        };
        assert_eq!(client.to_string(), "client1:4");
        assert_eq!(client.edge_idx(), None);
    }
}
