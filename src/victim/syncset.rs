//! Victim Syncset
//!
//! A snapshot of one edge's next victims plus its spare cache bytes,
//! piggybacked on directory, redirection and placement traffic.
//!
//! A *complete* syncset enumerates every synced victim and replaces the
//! receiver's view of the sender. A *delta* syncset (`complete == false`)
//! only carries entries that are new or changed since the previous syncset
//! sent to the same receiver, plus stale markers for entries that left the
//! victim set; it applies only on top of sequence number `seqnum - 1`.

use std::collections::HashMap;

use crate::cache::key_value::Key;
use crate::error::{Error, Result};

use super::cacheinfo::VictimCacheinfo;

/// Victim snapshot exchanged between edges
#[derive(Debug, Clone, PartialEq)]
pub struct VictimSyncset {
    pub source_edge_idx: u32,
    pub seqnum: u64,
    pub complete: bool,
    /// Bytes the sender can admit without evicting
    pub cache_margin_bytes: u64,
    /// In eviction order for complete syncsets
    pub victims: Vec<VictimCacheinfo>,
}

impl VictimSyncset {
    /// A complete syncset
    pub fn complete(
        source_edge_idx: u32,
        seqnum: u64,
        cache_margin_bytes: u64,
        victims: Vec<VictimCacheinfo>,
    ) -> Self {
        Self {
            source_edge_idx,
            seqnum,
            complete: true,
            cache_margin_bytes,
            victims,
        }
    }

    /// Delta-compress `self` against the previous complete syncset sent to
    /// the same receiver. Returns `self` unchanged when compression would
    /// not shrink it or the sequence numbers are not consecutive.
    pub fn compress(self, prev: &VictimSyncset) -> VictimSyncset {
        if !self.complete || !prev.complete || self.seqnum != prev.seqnum + 1 {
            return self;
        }

        let previous: HashMap<&Key, &VictimCacheinfo> =
            prev.victims.iter().map(|v| (&v.key, v)).collect();
        let current: HashMap<&Key, &VictimCacheinfo> =
            self.victims.iter().map(|v| (&v.key, v)).collect();

        let mut delta: Vec<VictimCacheinfo> = self
            .victims
            .iter()
            .filter(|v| match previous.get(&v.key) {
                Some(old) => v.differs_from(old),
                None => true,
            })
            .cloned()
            .collect();
        delta.extend(
            prev.victims
                .iter()
                .filter(|v| !current.contains_key(&v.key))
                .map(|v| VictimCacheinfo::stale_marker(v.key.clone())),
        );

        if delta.len() >= self.victims.len() {
            return self;
        }

        VictimSyncset {
            source_edge_idx: self.source_edge_idx,
            seqnum: self.seqnum,
            complete: false,
            cache_margin_bytes: self.cache_margin_bytes,
            victims: delta,
        }
    }

    /// Apply a delta on top of the complete syncset it was computed against
    pub fn recover(&self, base: &VictimSyncset) -> Result<VictimSyncset> {
        if self.complete {
            return Ok(self.clone());
        }
        if !base.complete || self.seqnum != base.seqnum + 1 {
            return Err(Error::Internal(format!(
                "delta syncset {} from edge {} does not follow {}",
                self.seqnum, self.source_edge_idx, base.seqnum
            )));
        }

        let mut merged: HashMap<Key, VictimCacheinfo> = base
            .victims
            .iter()
            .map(|v| (v.key.clone(), v.clone()))
            .collect();
        for entry in &self.victims {
            if entry.stale {
                merged.remove(&entry.key);
            } else {
                merged.insert(entry.key.clone(), entry.clone());
            }
        }

        let mut victims: Vec<VictimCacheinfo> = merged.into_values().collect();
        victims.sort_by(|a, b| {
            a.local_reward
                .total_cmp(&b.local_reward)
                .then_with(|| a.key.cmp(&b.key))
        });

        Ok(VictimSyncset::complete(
            self.source_edge_idx,
            self.seqnum,
            self.cache_margin_bytes,
            victims,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(key: &str, reward: f64) -> VictimCacheinfo {
        VictimCacheinfo {
            key: Key::from(key),
            object_size: 10,
            local_cached_popularity: reward,
            redirected_cached_popularity: 0.0,
            local_reward: reward,
            stale: false,
        }
    }

    fn base() -> VictimSyncset {
        VictimSyncset::complete(
            3,
            4,
            100,
            vec![info("a", 0.1), info("b", 0.2), info("c", 0.3), info("d", 0.4)],
        )
    }

    #[test]
    fn test_compress_emits_changes_and_stale_markers() {
        let next = VictimSyncset::complete(
            3,
            5,
            80,
            vec![info("a", 0.1), info("c", 0.3), info("d", 0.4), info("e", 0.5)],
        );
        let delta = next.clone().compress(&base());

        assert!(!delta.complete);
        assert_eq!(delta.seqnum, 5);
        assert_eq!(delta.cache_margin_bytes, 80);
        assert_eq!(delta.victims.len(), 2);
        assert!(delta.victims.iter().any(|v| v.key == Key::from("e") && !v.stale));
        assert!(delta.victims.iter().any(|v| v.key == Key::from("b") && v.stale));

        let recovered = delta.recover(&base()).unwrap();
        assert_eq!(recovered, next);
    }

    #[test]
    fn test_compress_falls_back_to_complete_when_larger() {
        let next = VictimSyncset::complete(3, 5, 100, vec![info("x", 0.1)]);
        let sent = next.clone().compress(&base());
        assert!(sent.complete);
        assert_eq!(sent, next);
    }

    #[test]
    fn test_compress_requires_consecutive_seqnum() {
        let next = VictimSyncset::complete(
            3,
            7,
            100,
            vec![info("a", 0.1), info("b", 0.2), info("c", 0.3), info("d", 0.4)],
        );
        assert!(next.clone().compress(&base()).complete);
    }

    #[test]
    fn test_recover_rejects_gap() {
        let delta = VictimSyncset {
            source_edge_idx: 3,
            seqnum: 9,
            complete: false,
            cache_margin_bytes: 0,
            victims: vec![],
        };
        assert!(delta.recover(&base()).is_err());
    }

    #[test]
    fn test_changed_entry_is_resent() {
        let next = VictimSyncset::complete(
            3,
            5,
            100,
            vec![info("a", 0.1), info("b", 0.25), info("c", 0.3), info("d", 0.4)],
        );
        let delta = next.clone().compress(&base());
        assert_eq!(delta.victims.len(), 1);
        assert_eq!(delta.victims[0].key, Key::from("b"));
        assert_eq!(delta.recover(&base()).unwrap(), next);
    }
}
