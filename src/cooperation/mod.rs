//! Cooperation Layer
//!
//! Beacon assignment, the directory each beacon keeps for its keys, and the
//! per-edge wrapper that also owns victim tracking and placement choice.

pub mod beacon;
pub mod directory;
mod wrapper;

pub use beacon::{beacon_edge_idx, worker_idx};
pub use directory::{
    DirectoryLookup, DirectoryOp, DirectoryTable, DirectoryUpdateOutcome,
    MetadataUpdateRequirement, WriteLockGrant,
};
pub use wrapper::CooperationWrapper;
