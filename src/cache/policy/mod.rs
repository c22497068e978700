//! Cache Eviction Policies
//!
//! A uniform interface over interchangeable eviction algorithms. Every policy
//! tracks its own byte usage; capacity enforcement lives one layer up in
//! [`LocalCache`](crate::cache::LocalCache).
//!
//! # Policies
//!
//! | Name          | Granularity | Independent admit | Notes                          |
//! |---------------|-------------|-------------------|--------------------------------|
//! | `lru`         | object      | yes               | recency order                  |
//! | `lfu`         | object      | yes               | (frequency, admission) order   |
//! | `sieve`       | object      | yes               | FIFO + visited bit + hand      |
//! | `cooperative` | object      | no                | grouped stats + reward order   |
//! | `segment`     | segment     | yes               | FIFO of fixed-byte segments    |
//!
//! Victim selection and eviction are split so a caller can inspect the
//! predicted victim, make a cross-edge decision, and only then commit. A
//! commit re-selects the victim and fails if it no longer matches.

mod cooperative;
mod lfu;
mod lru;
mod segment;
mod sieve;

pub use cooperative::CooperativePolicy;
pub use lfu::LfuPolicy;
pub use lru::LruPolicy;
pub use segment::SegmentPolicy;
pub use sieve::SievePolicy;

use serde::{Deserialize, Serialize};

use crate::cache::key_value::{Key, Value};
use crate::error::{Error, Result};
use crate::victim::VictimCacheinfo;

/// Default largest object a policy accepts (1MiB)
pub const DEFAULT_MAX_OBJECT_SIZE: u32 = 1024 * 1024;

/// Default number of admissions per popularity group
pub const DEFAULT_GROUP_SIZE: usize = 10;

/// Default segment size for the segment policy (64KiB)
pub const DEFAULT_SEGMENT_BYTES: u64 = 64 * 1024;

/// Bytes an object occupies in the cache
#[inline]
pub fn object_charge(key: &Key, value: &Value) -> u64 {
    key.len() as u64 + value.size() as u64
}

// =============================================================================
// Configuration
// =============================================================================

/// Policy configuration shared by all algorithms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Largest value size accepted by admit/update
    pub max_object_size: u32,
    /// Admissions per group (cooperative policy)
    pub group_size: usize,
    /// Bytes per segment (segment policy)
    pub segment_bytes: u64,
    /// Weight of a local hit in the local reward (cooperative policy)
    pub local_hit_weight: f64,
    /// Weight of a cooperative hit in the local reward (cooperative policy)
    pub cooperative_hit_weight: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            max_object_size: DEFAULT_MAX_OBJECT_SIZE,
            group_size: DEFAULT_GROUP_SIZE,
            segment_bytes: DEFAULT_SEGMENT_BYTES,
            local_hit_weight: 1.0,
            cooperative_hit_weight: 0.5,
        }
    }
}

impl PolicyConfig {
    /// Check whether a value size is acceptable; only tombstones may be empty
    #[inline]
    pub fn accepts(&self, value: &Value) -> bool {
        value.is_deleted() || (value.size() > 0 && value.size() <= self.max_object_size)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of [`CachePolicy::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Key absent; nothing changed
    NotCached,
    /// Value replaced
    Updated,
    /// Key present but the new size was refused; nothing changed
    Rejected,
}

impl UpdateOutcome {
    #[inline]
    pub fn is_cached(&self) -> bool {
        !matches!(self, UpdateOutcome::NotCached)
    }

    #[inline]
    pub fn is_successful(&self) -> bool {
        matches!(self, UpdateOutcome::Updated)
    }
}

/// Result of [`CachePolicy::admit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    /// Precondition violated; treated as a no-op
    AlreadyCached,
    /// Object size refused; equivalent to not caching
    Rejected,
}

impl AdmitOutcome {
    #[inline]
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmitOutcome::Admitted)
    }
}

// =============================================================================
// Policy Trait
// =============================================================================

/// Eviction algorithm operating on object metadata
pub trait CachePolicy: Send + Sync {
    /// Policy name as accepted by [`create_policy`]
    fn name(&self) -> &'static str;

    /// Whether a specific key can be targeted for eviction
    fn has_fine_grained_management(&self) -> bool {
        true
    }

    /// Whether admission can happen without a beacon handshake
    fn need_independent_admit(&self, _key: &Key) -> bool {
        true
    }

    fn exists(&self, key: &Key) -> bool;

    /// Look up a value, updating recency/frequency metadata on hit
    fn get(&mut self, key: &Key, is_redirected: bool) -> Option<Value>;

    /// Replace the value of an existing key
    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome;

    /// Insert a key that is not yet cached
    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome;

    /// Predict the next victim without evicting it
    fn select_victim(&mut self) -> Option<Key>;

    /// Evict `key` only if it is still the current victim
    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>>;

    /// Evict an arbitrary batch freeing at least `required_bytes`
    fn evict_batch(&mut self, required_bytes: u64) -> Vec<(Key, Value)> {
        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < required_bytes {
            let Some(victim) = self.select_victim() else {
                break;
            };
            match self.evict_if_match(&victim) {
                Ok(Some(value)) => {
                    freed += object_charge(&victim, &value);
                    victims.push((victim, value));
                }
                _ => break,
            }
        }
        victims
    }

    /// Bytes currently charged against capacity
    fn size_for_capacity(&self) -> u64;

    /// Number of cached objects
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Least valuable cached objects, in eviction order
    fn victim_cacheinfos(&self, _limit: usize) -> Vec<VictimCacheinfo> {
        Vec::new()
    }

    /// Record whether another edge also caches `key`
    fn set_neighbor_cached(&mut self, _key: &Key, _is_neighbor_cached: bool) {}
}

/// Build a policy by (case-insensitive) name
pub fn create_policy(name: &str, config: &PolicyConfig) -> Result<Box<dyn CachePolicy>> {
    let policy: Box<dyn CachePolicy> = match name.to_ascii_lowercase().as_str() {
        "lru" => Box::new(LruPolicy::new(config.clone())),
        "lfu" => Box::new(LfuPolicy::new(config.clone())),
        "sieve" => Box::new(SievePolicy::new(config.clone())),
        "cooperative" => Box::new(CooperativePolicy::new(config.clone())),
        "segment" => Box::new(SegmentPolicy::new(config.clone())),
        other => {
            return Err(Error::Config(format!("unknown cache policy: {}", other)));
        }
    };
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    impl std::fmt::Debug for dyn CachePolicy {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CachePolicy").field("name", &self.name()).finish()
        }
    }

    #[test]
    fn test_factory_by_name() {
        let config = PolicyConfig::default();
        for (name, expected) in [
            ("lru", "lru"),
            ("LFU", "lfu"),
            ("Sieve", "sieve"),
            ("cooperative", "cooperative"),
            ("segment", "segment"),
        ] {
            let policy = create_policy(name, &config).unwrap();
            assert_eq!(policy.name(), expected);
        }
    }

    #[test]
    fn test_factory_unknown_name() {
        for name in ["arc", "covered", ""] {
            let result = create_policy(name, &PolicyConfig::default());
            assert_matches!(result, Err(Error::Config(_)), "{:?}", name);
        }
    }

    #[test]
    fn test_granularity_and_admission_flags() {
        let config = PolicyConfig::default();
        let key = Key::from("k");

        let coop = create_policy("cooperative", &config).unwrap();
        assert!(coop.has_fine_grained_management());
        assert!(!coop.need_independent_admit(&key));

        let segment = create_policy("segment", &config).unwrap();
        assert!(!segment.has_fine_grained_management());
        assert!(segment.need_independent_admit(&key));
    }

    #[test]
    fn test_every_policy_rejects_oversized_objects() {
        let config = PolicyConfig {
            max_object_size: 100,
            ..Default::default()
        };
        for name in ["lru", "lfu", "sieve", "cooperative", "segment"] {
            let mut policy = create_policy(name, &config).unwrap();
            let key = Key::from("big");
            assert_eq!(policy.admit(key.clone(), Value::new(101)), AdmitOutcome::Rejected);
            assert!(!policy.exists(&key), "{} admitted an oversized object", name);
            assert_eq!(policy.admit(key.clone(), Value::new(0)), AdmitOutcome::Rejected);
            assert!(!policy.exists(&key), "{} admitted an empty object", name);

            assert_eq!(policy.admit(key.clone(), Value::new(50)), AdmitOutcome::Admitted);
            assert_eq!(policy.update(&key, Value::new(500)), UpdateOutcome::Rejected);
            assert_eq!(policy.update(&key, Value::new(0)), UpdateOutcome::Rejected);
            assert_eq!(policy.size_for_capacity(), 53, "{}", name);

            let missing = Key::from("missing");
            assert_eq!(policy.update(&missing, Value::new(5)), UpdateOutcome::NotCached);
        }
    }

    #[test]
    fn test_update_adjusts_size_by_delta() {
        for name in ["lru", "lfu", "sieve", "cooperative", "segment"] {
            let mut policy = create_policy(name, &PolicyConfig::default()).unwrap();
            let key = Key::from("abc");
            policy.admit(key.clone(), Value::new(10));
            assert_eq!(policy.size_for_capacity(), 13);

            assert_eq!(policy.update(&key, Value::new(30)), UpdateOutcome::Updated);
            assert_eq!(policy.size_for_capacity(), 33, "{}", name);

            assert_eq!(policy.update(&key, Value::new(4)), UpdateOutcome::Updated);
            assert_eq!(policy.size_for_capacity(), 7, "{}", name);
            assert_eq!(policy.get(&key, false), Some(Value::new(4)));
        }
    }

    #[test]
    fn test_duplicate_admit_is_noop() {
        for name in ["lru", "lfu", "sieve", "cooperative", "segment"] {
            let mut policy = create_policy(name, &PolicyConfig::default()).unwrap();
            let key = Key::from("dup");
            assert!(policy.admit(key.clone(), Value::new(10)).is_admitted());
            assert_eq!(
                policy.admit(key.clone(), Value::new(20)),
                AdmitOutcome::AlreadyCached
            );
            assert_eq!(policy.len(), 1);
            assert_eq!(policy.size_for_capacity(), 13);
        }
    }

    #[test]
    fn test_evict_batch_frees_requested_bytes() {
        for name in ["lru", "lfu", "sieve", "cooperative", "segment"] {
            let config = PolicyConfig {
                segment_bytes: 22,
                ..Default::default()
            };
            let mut policy = create_policy(name, &config).unwrap();
            for i in 0..6 {
                policy.admit(Key::from(format!("k{}", i)), Value::new(9));
            }
            assert_eq!(policy.size_for_capacity(), 66);

            let victims = policy.evict_batch(20);
            let freed: u64 = victims.iter().map(|(k, v)| object_charge(k, v)).sum();
            assert!(freed >= 20, "{} freed {}", name, freed);
            assert_eq!(policy.size_for_capacity(), 66 - freed);
            for (key, _) in &victims {
                assert!(!policy.exists(key));
            }
        }
    }
}
