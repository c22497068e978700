//! Victim Tracker
//!
//! Per-edge record of every neighbor's victims, plus the bookkeeping needed
//! to delta-compress this edge's own syncsets per receiver.
//!
//! ```text
//!    outbound                               inbound
//!  ┌──────────────────┐                  ┌──────────────────┐
//!  │ sent[dst]        │ compress(prev)   │ neighbors[src]   │ merge
//!  │ last complete    │ ───────────────▶ │ complete view    │ ◀── syncset
//!  └──────────────────┘                  └──────────────────┘
//! ```

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::cache::key_value::Key;

use super::cacheinfo::VictimCacheinfo;
use super::syncset::VictimSyncset;

/// Send a complete syncset at least this often per receiver so a receiver
/// that missed a delta converges again.
pub const DEFAULT_FULL_SYNC_INTERVAL: u64 = 8;

/// What [`VictimTracker::merge`] did with a syncset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Complete syncset installed as the new view
    Replaced,
    /// Delta applied on top of the current view
    Amended,
    /// Older than (or equal to) what is already known
    Outdated,
    /// Delta that does not follow the current view
    Gap,
}

/// Tracks neighbors' victims and this edge's sent syncsets
#[derive(Debug)]
pub struct VictimTracker {
    edge_idx: u32,
    full_sync_interval: u64,
    neighbors: HashMap<u32, VictimSyncset>,
    sent: HashMap<u32, VictimSyncset>,
}

impl VictimTracker {
    pub fn new(edge_idx: u32) -> Self {
        Self::with_full_sync_interval(edge_idx, DEFAULT_FULL_SYNC_INTERVAL)
    }

    pub fn with_full_sync_interval(edge_idx: u32, full_sync_interval: u64) -> Self {
        Self {
            edge_idx,
            full_sync_interval: full_sync_interval.max(1),
            neighbors: HashMap::new(),
            sent: HashMap::new(),
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Build the syncset to piggyback on a message to `dst_edge_idx`
    pub fn build_syncset(
        &mut self,
        dst_edge_idx: u32,
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
    ) -> VictimSyncset {
        let seqnum = self.sent.get(&dst_edge_idx).map_or(0, |s| s.seqnum + 1);
        let current =
            VictimSyncset::complete(self.edge_idx, seqnum, cache_margin_bytes, victims);

        let outbound = match self.sent.get(&dst_edge_idx) {
            Some(prev) if seqnum % self.full_sync_interval != 0 => current.clone().compress(prev),
            _ => current.clone(),
        };
        self.sent.insert(dst_edge_idx, current);
        outbound
    }

    /// Build an uncompressed syncset for `dst_edge_idx`, e.g. in reply to an
    /// explicit victim fetch from a receiver with no view yet
    pub fn build_complete_syncset(
        &mut self,
        dst_edge_idx: u32,
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
    ) -> VictimSyncset {
        let seqnum = self.sent.get(&dst_edge_idx).map_or(0, |s| s.seqnum + 1);
        let current =
            VictimSyncset::complete(self.edge_idx, seqnum, cache_margin_bytes, victims);
        self.sent.insert(dst_edge_idx, current.clone());
        current
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Merge a syncset received from a neighbor
    pub fn merge(&mut self, syncset: &VictimSyncset) -> MergeOutcome {
        let src = syncset.source_edge_idx;
        if src == self.edge_idx {
            return MergeOutcome::Outdated;
        }

        let existing = self.neighbors.get(&src);
        if let Some(view) = existing {
            if syncset.seqnum < view.seqnum || (!syncset.complete && syncset.seqnum == view.seqnum)
            {
                return MergeOutcome::Outdated;
            }
        }

        if syncset.complete {
            self.neighbors.insert(src, syncset.clone());
            return MergeOutcome::Replaced;
        }

        let Some(view) = existing else {
            warn!(
                "Edge {} got delta syncset {} from edge {} without a base",
                self.edge_idx, syncset.seqnum, src
            );
            return MergeOutcome::Gap;
        };
        match syncset.recover(view) {
            Ok(recovered) => {
                self.neighbors.insert(src, recovered);
                MergeOutcome::Amended
            }
            Err(e) => {
                debug!("Dropping delta syncset: {}", e);
                MergeOutcome::Gap
            }
        }
    }

    /// Current view of one neighbor
    pub fn view(&self, edge_idx: u32) -> Option<&VictimSyncset> {
        self.neighbors.get(&edge_idx)
    }

    /// Whether `key` is among the victims `edge_idx` reported
    pub fn is_victim_at(&self, edge_idx: u32, key: &Key) -> bool {
        self.neighbors
            .get(&edge_idx)
            .is_some_and(|s| s.victims.iter().any(|v| &v.key == key))
    }

    /// Whether `edge_idx` could take an object of `charge` bytes whose reward
    /// would be `reward`: either its margin covers it, or its known victims
    /// cheaper than `reward` free enough bytes. Unknown neighbors are
    /// assumed to have room.
    pub fn can_absorb(&self, edge_idx: u32, charge: u64, reward: f64) -> bool {
        let Some(view) = self.neighbors.get(&edge_idx) else {
            return true;
        };
        if view.cache_margin_bytes >= charge {
            return true;
        }
        let mut reclaimable = view.cache_margin_bytes;
        for victim in &view.victims {
            if victim.local_reward >= reward {
                break;
            }
            reclaimable += victim.key.len() as u64 + victim.object_size as u64;
            if reclaimable >= charge {
                return true;
            }
        }
        false
    }

    /// Spare bytes last reported by `edge_idx`
    pub fn margin_of(&self, edge_idx: u32) -> Option<u64> {
        self.neighbors.get(&edge_idx).map(|s| s.cache_margin_bytes)
    }
}
