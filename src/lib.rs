//! edgecoop - Cooperative Multi-Edge Key-Value Cache
//!
//! A set of edge nodes, each with a byte-bounded local cache, cooperate so a
//! miss at one edge can be served by a neighbor before falling back to the
//! cloud origin.
//!
//! # Architecture
//!
//! Every key hashes to one *beacon* edge that keeps its directory entry:
//! which edges cache the key, whether each copy is valid, and whether a
//! write is in flight.
//!
//! ```text
//!  client ──▶ edge A ── local hit? ──▶ LocalHit
//!               │ miss
//!               ├──▶ beacon(key): directory lookup
//!               ├──▶ edge B: redirected get ──▶ CooperativeHit
//!               └──▶ cloud ──▶ GlobalMiss ──▶ admit at A (+ placement)
//! ```
//!
//! # Features
//!
//! - Pluggable eviction: LRU, LFU, SIEVE, a cooperative grouped policy and a
//!   coarse-grained segment policy
//! - Beacon directories with write locks and copy invalidation
//! - Victim synchronization piggybacked on protocol traffic, delta-compressed
//! - Non-blocking placement of fetched objects on neighbors
//! - Prometheus counters and per-edge statistics
//!
//! # Modules
//!
//! - [`cache`] - Key/value model, eviction policies, local cache
//! - [`cooperation`] - Beacon hashing, directory tables, placement choice
//! - [`victim`] - Victim cacheinfos, syncsets and tracking
//! - [`network`] - Message model and transport
//! - [`cloud`] - Origin storage
//! - [`edge`] - Edge node runtime: dispatcher, workers, processors
//! - [`cluster`] - In-process cluster harness and client
//! - [`workload`] - Synthetic request stream
//! - [`metrics`] - Prometheus counters
//! - [`error`] - Error types

pub mod cache;
pub mod cloud;
pub mod cluster;
pub mod cooperation;
pub mod edge;
pub mod error;
pub mod metrics;
pub mod network;
pub mod victim;
pub mod workload;

pub use cache::{Hitflag, Key, LocalCache, PolicyConfig, Value};
pub use cloud::{CloudBackend, CloudConfig, InMemoryCloud};
pub use cluster::{Client, ClientResponse, Cluster, ClusterConfig};
pub use edge::{EdgeConfig, EdgeHandle, EdgeNode, EdgeStatsSnapshot};
pub use error::{Error, Result};
pub use workload::{WorkloadConfig, WorkloadReport};
