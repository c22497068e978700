//! Messaging
//!
//! Message model, addressing and the transport edges and clients use to
//! reach each other.

pub mod message;
pub mod transport;

pub use message::{
    CacheServerItem, DirectoryUpdate, DirectoryUpdateResult, Message, MessageKind, NodeAddr,
    NodeId, Payload, DISPATCHER_PORT,
};
pub use transport::{InMemoryNetwork, Mailbox, NetworkConfig, Transport};
