//! Cooperation Wrapper
//!
//! Per-edge view of the cooperation layer: beacon assignment, the directory
//! table for keys this edge is beacon of, the victim tracker, and placement
//! edgeset selection.

use parking_lot::Mutex;

use super::beacon::beacon_edge_idx;
use super::directory::{
    DirectoryLookup, DirectoryOp, DirectoryTable, DirectoryUpdateOutcome, WriteLockGrant,
};
use crate::cache::key_value::Key;
use crate::error::{Error, Result};
use crate::victim::{MergeOutcome, VictimCacheinfo, VictimSyncset, VictimTracker};

/// Cooperation state owned by one edge
#[derive(Debug)]
pub struct CooperationWrapper {
    edge_idx: u32,
    edgecnt: u32,
    placement_top_k: usize,
    directory: DirectoryTable,
    tracker: Mutex<VictimTracker>,
}

impl CooperationWrapper {
    pub fn new(edge_idx: u32, edgecnt: u32, placement_top_k: usize) -> Self {
        Self {
            edge_idx,
            edgecnt,
            placement_top_k: placement_top_k.max(1),
            directory: DirectoryTable::new(edge_idx),
            tracker: Mutex::new(VictimTracker::new(edge_idx)),
        }
    }

    pub fn edge_idx(&self) -> u32 {
        self.edge_idx
    }

    pub fn edgecnt(&self) -> u32 {
        self.edgecnt
    }

    // =========================================================================
    // Beacon
    // =========================================================================

    pub fn beacon_of(&self, key: &Key) -> u32 {
        beacon_edge_idx(key, self.edgecnt)
    }

    pub fn is_beacon(&self, key: &Key) -> bool {
        self.beacon_of(key) == self.edge_idx
    }

    fn ensure_beacon(&self, key: &Key) -> Result<()> {
        if self.is_beacon(key) {
            Ok(())
        } else {
            Err(Error::invariant(format!(
                "edge {} is not the beacon of {} (beacon {})",
                self.edge_idx,
                key,
                self.beacon_of(key)
            )))
        }
    }

    // =========================================================================
    // Directory (beacon side)
    // =========================================================================

    pub fn directory(&self) -> &DirectoryTable {
        &self.directory
    }

    pub fn lookup_local(&self, key: &Key, requester: u32) -> Result<DirectoryLookup> {
        self.ensure_beacon(key)?;
        Ok(self.directory.lookup(key, requester))
    }

    pub fn update_local(
        &self,
        key: &Key,
        edge: u32,
        op: DirectoryOp,
    ) -> Result<DirectoryUpdateOutcome> {
        self.ensure_beacon(key)?;
        Ok(self.directory.update(key, edge, op))
    }

    pub fn acquire_write_lock_local(&self, key: &Key, writer: u32) -> Result<WriteLockGrant> {
        self.ensure_beacon(key)?;
        Ok(self.directory.acquire_write_lock(key, writer))
    }

    pub fn release_write_lock_local(&self, key: &Key, writer: u32) -> Result<bool> {
        self.ensure_beacon(key)?;
        Ok(self.directory.release_write_lock(key, writer))
    }

    // =========================================================================
    // Victim Synchronization
    // =========================================================================

    pub fn merge_syncset(&self, syncset: &VictimSyncset) -> MergeOutcome {
        self.tracker.lock().merge(syncset)
    }

    pub fn build_syncset(
        &self,
        dst_edge_idx: u32,
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
    ) -> VictimSyncset {
        self.tracker
            .lock()
            .build_syncset(dst_edge_idx, cache_margin_bytes, victims)
    }

    pub fn build_complete_syncset(
        &self,
        dst_edge_idx: u32,
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
    ) -> VictimSyncset {
        self.tracker
            .lock()
            .build_complete_syncset(dst_edge_idx, cache_margin_bytes, victims)
    }

    pub fn has_victim_view(&self, edge_idx: u32) -> bool {
        self.tracker.lock().view(edge_idx).is_some()
    }

    pub fn can_absorb(&self, edge_idx: u32, charge: u64, reward: f64) -> bool {
        self.tracker.lock().can_absorb(edge_idx, charge, reward)
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Neighbors that should also receive a freshly fetched object
    ///
    /// The local edge always admits on its own, so at most `top_k - 1`
    /// neighbors are returned, most spare bytes first. Neighbors with no
    /// known victims are kept; the caller fetches their victims before
    /// notifying them.
    pub fn placement_candidates(&self, charge: u64, reward: f64) -> Vec<u32> {
        if self.placement_top_k <= 1 {
            return Vec::new();
        }
        let tracker = self.tracker.lock();
        let mut candidates: Vec<(u64, u32)> = (0..self.edgecnt)
            .filter(|edge| *edge != self.edge_idx)
            .filter(|edge| tracker.can_absorb(*edge, charge, reward))
            .map(|edge| (tracker.margin_of(edge).unwrap_or(0), edge))
            .collect();
        // Most margin first, then lowest index
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        candidates
            .into_iter()
            .take(self.placement_top_k - 1)
            .map(|(_, edge)| edge)
            .collect()
    }
}
