//! Directory Table
//!
//! Held by a beacon for the keys it owns: which edges cache each key, whether
//! each copy is valid, and whether a write is in flight.
//!
//! # Design
//!
//! - Entries live in a `DashMap`, so updates to different keys proceed in
//!   parallel and each entry is mutated under its shard lock.
//! - An entry without holders and without a write in flight is erased.
//! - Lookup picks among valid holders other than the requester in
//!   round-robin order, which keeps runs reproducible.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cache::key_value::Key;

/// Directory mutation reported by a caching edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryOp {
    /// The edge admitted the key
    Admit,
    /// The edge evicted the key
    Evict,
    /// The edge refreshed a stale copy from the cloud
    Validate,
}

/// Sole-copy transitions the beacon must tell a holder about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataUpdateRequirement {
    None,
    /// `notify_edge` held the only copy and now has company
    FromSingleToMultiple { notify_edge: u32 },
    /// `notify_edge` now holds the only copy
    FromMultipleToSingle { notify_edge: u32 },
}

/// Answer to a directory lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLookup {
    /// Some edge caches the key
    pub is_global_cached: bool,
    /// A write holds the key's lock
    pub being_written: bool,
    /// Edge to redirect to, if a valid copy exists elsewhere
    pub target_edge_idx: Option<u32>,
}

/// Answer to a directory update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryUpdateOutcome {
    pub is_global_cached: bool,
    pub being_written: bool,
    /// Whether edges other than the reporter still cache the key
    pub is_neighbor_cached: bool,
    pub metadata_update: MetadataUpdateRequirement,
}

/// Result of a write-lock acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteLockGrant {
    pub acquired: bool,
    /// Holders whose copies the writer's beacon must invalidate
    pub invalidate_edges: Vec<u32>,
}

#[derive(Debug, Default)]
struct DirectoryEntry {
    /// edge -> copy is valid
    holders: BTreeMap<u32, bool>,
    /// Edge holding the write lock
    writer: Option<u32>,
}

impl DirectoryEntry {
    fn being_written(&self) -> bool {
        self.writer.is_some()
    }

    fn is_erasable(&self) -> bool {
        self.holders.is_empty() && self.writer.is_none()
    }
}

/// Beacon-side directory for the keys one edge is beacon of
#[derive(Debug)]
pub struct DirectoryTable {
    edge_idx: u32,
    entries: DashMap<Key, DirectoryEntry>,
    next_pick: AtomicU64,
}

impl DirectoryTable {
    pub fn new(edge_idx: u32) -> Self {
        Self {
            edge_idx,
            entries: DashMap::new(),
            next_pick: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub fn lookup(&self, key: &Key, requester: u32) -> DirectoryLookup {
        let Some(entry) = self.entries.get(key) else {
            return DirectoryLookup {
                is_global_cached: false,
                being_written: false,
                target_edge_idx: None,
            };
        };

        let candidates: Vec<u32> = entry
            .holders
            .iter()
            .filter(|(edge, valid)| **valid && **edge != requester)
            .map(|(edge, _)| *edge)
            .collect();
        let target_edge_idx = if candidates.is_empty() || entry.being_written() {
            None
        } else {
            let pick = self.next_pick.fetch_add(1, Ordering::Relaxed) as usize;
            Some(candidates[pick % candidates.len()])
        };

        DirectoryLookup {
            is_global_cached: !entry.holders.is_empty(),
            being_written: entry.being_written(),
            target_edge_idx,
        }
    }

    /// Edges caching `key`, with their validity
    pub fn holders(&self, key: &Key) -> Vec<(u32, bool)> {
        self.entries
            .get(key)
            .map(|e| e.holders.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    /// Keys `edge_idx` is recorded as caching
    pub fn keys_cached_by(&self, edge_idx: u32) -> Vec<Key> {
        self.entries
            .iter()
            .filter(|e| e.holders.contains_key(&edge_idx))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn is_being_written(&self, key: &Key) -> bool {
        self.entries.get(key).is_some_and(|e| e.being_written())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // =========================================================================
    // Update
    // =========================================================================

    pub fn update(&self, key: &Key, edge: u32, op: DirectoryOp) -> DirectoryUpdateOutcome {
        let mut entry = match self.entries.entry(key.clone()) {
            Entry::Occupied(e) => e,
            Entry::Vacant(v) => {
                if op != DirectoryOp::Admit {
                    warn!(
                        "Beacon {} got {:?} for uncached {} from edge {}",
                        self.edge_idx, op, key, edge
                    );
                    return DirectoryUpdateOutcome {
                        is_global_cached: false,
                        being_written: false,
                        is_neighbor_cached: false,
                        metadata_update: MetadataUpdateRequirement::None,
                    };
                }
                v.insert(DirectoryEntry {
                    holders: BTreeMap::from([(edge, true)]),
                    writer: None,
                });
                debug!("Beacon {} first copy of {} at edge {}", self.edge_idx, key, edge);
                return DirectoryUpdateOutcome {
                    is_global_cached: true,
                    being_written: false,
                    is_neighbor_cached: false,
                    metadata_update: MetadataUpdateRequirement::None,
                };
            }
        };

        let state = entry.get_mut();
        let before = state.holders.len();
        match op {
            DirectoryOp::Admit => {
                if state.holders.contains_key(&edge) {
                    warn!(
                        "Beacon {}: edge {} admitted {} twice",
                        self.edge_idx, edge, key
                    );
                } else {
                    state.holders.insert(edge, !state.being_written());
                }
            }
            DirectoryOp::Evict => {
                if state.holders.remove(&edge).is_none() {
                    warn!(
                        "Beacon {}: edge {} evicted {} it never admitted",
                        self.edge_idx, edge, key
                    );
                }
            }
            DirectoryOp::Validate => {
                let being_written = state.being_written();
                if let Some(valid) = state.holders.get_mut(&edge) {
                    *valid = !being_written;
                }
            }
        }
        let after = state.holders.len();

        let metadata_update = match (before, after) {
            (1, 2) => state
                .holders
                .keys()
                .find(|e| **e != edge)
                .map_or(MetadataUpdateRequirement::None, |e| {
                    MetadataUpdateRequirement::FromSingleToMultiple { notify_edge: *e }
                }),
            (2, 1) => state
                .holders
                .keys()
                .next()
                .map_or(MetadataUpdateRequirement::None, |e| {
                    MetadataUpdateRequirement::FromMultipleToSingle { notify_edge: *e }
                }),
            _ => MetadataUpdateRequirement::None,
        };

        let outcome = DirectoryUpdateOutcome {
            is_global_cached: after > 0,
            being_written: state.being_written(),
            is_neighbor_cached: state.holders.keys().any(|e| *e != edge),
            metadata_update,
        };
        if state.is_erasable() {
            entry.remove();
        }
        debug!(
            "Beacon {} {:?} {} by edge {} -> {:?}",
            self.edge_idx, op, key, edge, outcome
        );
        outcome
    }

    // =========================================================================
    // Write Lock
    // =========================================================================

    /// Take the write lock on `key` and mark every other copy stale.
    ///
    /// A repeated request from the current holder is granted again with the
    /// same (already stale) copies, so a writer whose grant was lost can
    /// resend without wedging the key.
    pub fn acquire_write_lock(&self, key: &Key, writer: u32) -> WriteLockGrant {
        let mut entry = self.entries.entry(key.clone()).or_default();
        let holder = entry.writer;
        match holder {
            Some(holder) if holder != writer => {
                return WriteLockGrant {
                    acquired: false,
                    invalidate_edges: Vec::new(),
                };
            }
            Some(_) => debug!(
                "Beacon {}: edge {} re-acquired write lock on {}",
                self.edge_idx, writer, key
            ),
            None => entry.writer = Some(writer),
        }
        let mut invalidate_edges = Vec::new();
        for (edge, valid) in entry.holders.iter_mut() {
            if *edge != writer {
                *valid = false;
                invalidate_edges.push(*edge);
            }
        }
        WriteLockGrant {
            acquired: true,
            invalidate_edges,
        }
    }

    /// Release the write lock on `key` and validate the writer's own copy;
    /// returns whether `writer` held the lock
    pub fn release_write_lock(&self, key: &Key, writer: u32) -> bool {
        let Entry::Occupied(mut entry) = self.entries.entry(key.clone()) else {
            warn!(
                "Beacon {}: edge {} released unlocked {}",
                self.edge_idx, writer, key
            );
            return false;
        };
        let state = entry.get_mut();
        if state.writer != Some(writer) {
            warn!(
                "Beacon {}: edge {} released {} held by {:?}",
                self.edge_idx, writer, key, state.writer
            );
            return false;
        }
        state.writer = None;
        if let Some(valid) = state.holders.get_mut(&writer) {
            *valid = true;
        }
        if entry.get().is_erasable() {
            entry.remove();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_skips_requester_and_invalid_copies() {
        let table = DirectoryTable::new(1);
        let key = Key::from("k");
        assert!(!table.lookup(&key, 0).is_global_cached);

        table.update(&key, 0, DirectoryOp::Admit);
        let lookup = table.lookup(&key, 0);
        assert!(lookup.is_global_cached);
        assert_eq!(lookup.target_edge_idx, None);
        assert_eq!(table.lookup(&key, 2).target_edge_idx, Some(0));
    }

    #[test]
    fn test_lookup_round_robins_targets() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");
        table.update(&key, 1, DirectoryOp::Admit);
        table.update(&key, 2, DirectoryOp::Admit);

        let picks: Vec<_> = (0..4)
            .map(|_| table.lookup(&key, 0).target_edge_idx.unwrap())
            .collect();
        assert_eq!(picks, vec![1, 2, 1, 2]);
    }

    #[test]
    fn test_metadata_transitions() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");

        let first = table.update(&key, 1, DirectoryOp::Admit);
        assert_eq!(first.metadata_update, MetadataUpdateRequirement::None);
        assert!(!first.is_neighbor_cached);

        let second = table.update(&key, 2, DirectoryOp::Admit);
        assert_eq!(
            second.metadata_update,
            MetadataUpdateRequirement::FromSingleToMultiple { notify_edge: 1 }
        );
        assert!(second.is_neighbor_cached);

        let third = table.update(&key, 3, DirectoryOp::Admit);
        assert_eq!(third.metadata_update, MetadataUpdateRequirement::None);

        table.update(&key, 3, DirectoryOp::Evict);
        let down = table.update(&key, 1, DirectoryOp::Evict);
        assert_eq!(
            down.metadata_update,
            MetadataUpdateRequirement::FromMultipleToSingle { notify_edge: 2 }
        );

        let last = table.update(&key, 2, DirectoryOp::Evict);
        assert!(!last.is_global_cached);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_admit_and_unknown_evict_are_ignored() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");
        table.update(&key, 1, DirectoryOp::Admit);
        table.update(&key, 1, DirectoryOp::Admit);
        assert_eq!(table.holders(&key), vec![(1, true)]);

        let outcome = table.update(&Key::from("other"), 1, DirectoryOp::Evict);
        assert!(!outcome.is_global_cached);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_write_lock_invalidates_other_copies() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");
        table.update(&key, 1, DirectoryOp::Admit);
        table.update(&key, 2, DirectoryOp::Admit);

        let grant = table.acquire_write_lock(&key, 2);
        assert!(grant.acquired);
        assert_eq!(grant.invalidate_edges, vec![1]);
        assert_eq!(table.holders(&key), vec![(1, false), (2, true)]);

        assert!(!table.acquire_write_lock(&key, 3).acquired);
        let lookup = table.lookup(&key, 3);
        assert!(lookup.being_written);
        assert_eq!(lookup.target_edge_idx, None);

        // Admission during the write starts invalid
        table.update(&key, 3, DirectoryOp::Admit);
        assert!(table.holders(&key).contains(&(3, false)));

        assert!(table.release_write_lock(&key, 2));
        assert!(!table.is_being_written(&key));
        table.update(&key, 1, DirectoryOp::Validate);
        assert_eq!(table.lookup(&key, 2).target_edge_idx, Some(1));
    }

    #[test]
    fn test_write_lock_on_uncached_key_leaves_no_entry() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");
        assert!(table.acquire_write_lock(&key, 1).acquired);
        assert!(table.is_being_written(&key));
        assert!(table.release_write_lock(&key, 1));
        assert!(table.is_empty());
        assert!(!table.release_write_lock(&key, 1));
    }

    #[test]
    fn test_write_lock_regrant_to_holder() {
        let table = DirectoryTable::new(0);
        let key = Key::from("k");
        table.update(&key, 1, DirectoryOp::Admit);
        table.update(&key, 2, DirectoryOp::Admit);

        assert_eq!(table.acquire_write_lock(&key, 2).invalidate_edges, vec![1]);
        // A resent request from the holder is granted again
        let again = table.acquire_write_lock(&key, 2);
        assert!(again.acquired);
        assert_eq!(again.invalidate_edges, vec![1]);
        assert!(!table.acquire_write_lock(&key, 1).acquired);

        // Only the holder can release
        assert!(!table.release_write_lock(&key, 1));
        assert!(table.is_being_written(&key));
        assert_eq!(table.holders(&key), vec![(1, false), (2, true)]);

        assert!(table.release_write_lock(&key, 2));
        assert!(!table.release_write_lock(&key, 2));
        assert!(table.acquire_write_lock(&key, 1).acquired);
    }

    #[test]
    fn test_keys_cached_by() {
        let table = DirectoryTable::new(0);
        table.update(&Key::from("a"), 1, DirectoryOp::Admit);
        table.update(&Key::from("b"), 1, DirectoryOp::Admit);
        table.update(&Key::from("b"), 2, DirectoryOp::Admit);
        let mut keys = table.keys_cached_by(1);
        keys.sort();
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
        assert_eq!(table.keys_cached_by(2), vec![Key::from("b")]);
    }
}
