//! Per-edge statistics

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::key_value::Hitflag;
use crate::cache::local_cache::LocalCacheStats;

/// Lock-free counters updated by an edge's tasks
#[derive(Debug, Default)]
pub struct EdgeStats {
    local_hits: AtomicU64,
    cooperative_hits: AtomicU64,
    cooperative_invalids: AtomicU64,
    global_misses: AtomicU64,
    writes: AtomicU64,
    evictions: AtomicU64,
    directory_evict_requests: AtomicU64,
    placements_sent: AtomicU64,
    placements_admitted: AtomicU64,
    victim_fetches: AtomicU64,
    invalidations: AtomicU64,
    metadata_updates: AtomicU64,
    retries: AtomicU64,
    unmatched_responses: AtomicU64,
}

impl EdgeStats {
    pub fn record_hitflag(&self, hitflag: Hitflag) {
        let counter = match hitflag {
            Hitflag::LocalHit => &self.local_hits,
            Hitflag::CooperativeHit => &self.cooperative_hits,
            Hitflag::CooperativeInvalid => &self.cooperative_invalids,
            Hitflag::GlobalMiss => &self.global_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_directory_evict_request(&self) {
        self.directory_evict_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placement_sent(&self) {
        self.placements_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_placement_admitted(&self) {
        self.placements_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_victim_fetch(&self) {
        self.victim_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_metadata_update(&self) {
        self.metadata_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmatched_response(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn placements_sent(&self) -> u64 {
        self.placements_sent.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, edge_idx: u32, cache: LocalCacheStats) -> EdgeStatsSnapshot {
        EdgeStatsSnapshot {
            edge_idx,
            local_hits: self.local_hits.load(Ordering::Relaxed),
            cooperative_hits: self.cooperative_hits.load(Ordering::Relaxed),
            cooperative_invalids: self.cooperative_invalids.load(Ordering::Relaxed),
            global_misses: self.global_misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            directory_evict_requests: self.directory_evict_requests.load(Ordering::Relaxed),
            placements_sent: self.placements_sent.load(Ordering::Relaxed),
            placements_admitted: self.placements_admitted.load(Ordering::Relaxed),
            victim_fetches: self.victim_fetches.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            metadata_updates: self.metadata_updates.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            cache,
            taken_at: Utc::now(),
        }
    }
}

/// Point-in-time copy of an edge's counters
#[derive(Debug, Clone, Serialize)]
pub struct EdgeStatsSnapshot {
    pub edge_idx: u32,
    pub local_hits: u64,
    pub cooperative_hits: u64,
    pub cooperative_invalids: u64,
    pub global_misses: u64,
    pub writes: u64,
    pub evictions: u64,
    pub directory_evict_requests: u64,
    pub placements_sent: u64,
    pub placements_admitted: u64,
    pub victim_fetches: u64,
    pub invalidations: u64,
    pub metadata_updates: u64,
    pub retries: u64,
    pub unmatched_responses: u64,
    pub cache: LocalCacheStats,
    pub taken_at: DateTime<Utc>,
}

impl EdgeStatsSnapshot {
    pub fn reads(&self) -> u64 {
        self.local_hits + self.cooperative_hits + self.cooperative_invalids + self.global_misses
    }

    /// Fraction of reads served without the cloud
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.reads();
        if reads == 0 {
            return 0.0;
        }
        (self.local_hits + self.cooperative_hits) as f64 / reads as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::local_cache::LocalCache;
    use crate::cache::policy::PolicyConfig;

    #[test]
    fn test_snapshot_hit_ratio() {
        let stats = EdgeStats::default();
        stats.record_hitflag(Hitflag::LocalHit);
        stats.record_hitflag(Hitflag::CooperativeHit);
        stats.record_hitflag(Hitflag::GlobalMiss);
        stats.record_hitflag(Hitflag::GlobalMiss);

        let cache = LocalCache::new(0, "lru", 100, &PolicyConfig::default()).unwrap();
        let snapshot = stats.snapshot(0, cache.stats());
        assert_eq!(snapshot.reads(), 4);
        assert!((snapshot.hit_ratio() - 0.5).abs() < f64::EPSILON);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["global_misses"], 2);
        assert_eq!(json["cache"]["policy"], "lru");
    }
}
