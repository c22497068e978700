//! Victim Synchronization
//!
//! Edges advertise the objects they would evict next so that placement
//! decisions elsewhere avoid pushing objects into caches that are about to
//! drop them. Syncsets ride on existing messages; there is no dedicated sync
//! traffic apart from explicit victim fetches.

mod cacheinfo;
mod syncset;
mod tracker;

pub use cacheinfo::VictimCacheinfo;
pub use syncset::VictimSyncset;
pub use tracker::{MergeOutcome, VictimTracker, DEFAULT_FULL_SYNC_INTERVAL};
