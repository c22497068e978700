//! Beacon assignment
//!
//! Every key has exactly one beacon edge holding its directory entry. The
//! mapping is a pure function of the key bytes and the edge count, so all
//! edges agree without coordination.

use crate::cache::key_value::Key;

/// Beacon edge of `key` in a cluster of `edgecnt` edges
pub fn beacon_edge_idx(key: &Key, edgecnt: u32) -> u32 {
    debug_assert!(edgecnt > 0);
    (key.hash_value() % edgecnt.max(1) as u64) as u32
}

/// Worker of an edge that serves requests for `key`
pub fn worker_idx(key: &Key, worker_count: usize) -> usize {
    (key.hash_value() % worker_count.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_beacon_is_stable_and_in_range() {
        for i in 0..200 {
            let key = Key::from(format!("key-{}", i));
            let first = beacon_edge_idx(&key, 4);
            assert!(first < 4);
            assert_eq!(first, beacon_edge_idx(&Key::from(format!("key-{}", i)), 4));
        }
    }

    #[test]
    fn test_beacons_spread_over_edges() {
        let beacons: HashSet<u32> = (0..200)
            .map(|i| beacon_edge_idx(&Key::from(format!("key-{}", i)), 4))
            .collect();
        assert_eq!(beacons.len(), 4);
    }

    #[test]
    fn test_single_edge_owns_everything() {
        assert_eq!(beacon_edge_idx(&Key::from("anything"), 1), 0);
        assert_eq!(worker_idx(&Key::from("anything"), 1), 0);
    }
}
