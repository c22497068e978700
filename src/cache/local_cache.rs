//! Local Edge Cache
//!
//! Wraps exactly one [`CachePolicy`] with capacity accounting, a validity map
//! and a single reader/writer lock.
//!
//! # Design
//!
//! - One `parking_lot::RwLock` around policy + validity map; every policy
//!   operation is atomic with respect to the others. Readers: existence and
//!   validity checks, victim cacheinfos. Writers: get (metadata side
//!   effects), update, admit, victim selection, eviction, invalidation.
//! - The lock is only held for in-memory work, never across an `.await`.
//! - A cached object can be *invalid*: a concurrent write elsewhere made the
//!   local copy stale. Invalid objects still occupy bytes and are served
//!   only after being refreshed by an update.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use super::key_value::{Key, Value};
use super::policy::{
    create_policy, object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome,
};
use crate::error::{Error, Result};
use crate::victim::VictimCacheinfo;

/// Give up on fine-grained eviction after this many consecutive victim
/// mismatches; each mismatch means another task touched the victim.
const MAX_VICTIM_RETRIES: usize = 64;

/// Outcome of a local lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalGet {
    /// Present only when cached and valid
    pub value: Option<Value>,
    pub is_cached: bool,
    pub is_valid: bool,
}

impl LocalGet {
    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

/// Local cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct LocalCacheStats {
    pub policy: &'static str,
    pub object_count: usize,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub admissions: u64,
    pub evictions: u64,
}

struct CacheState {
    policy: Box<dyn CachePolicy>,
    validity: HashMap<Key, bool>,
}

/// Byte-bounded cache owned by one edge
pub struct LocalCache {
    edge_idx: u32,
    capacity_bytes: u64,
    policy_name: &'static str,
    fine_grained: bool,
    state: RwLock<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    admissions: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    /// Create a cache running the named policy
    pub fn new(
        edge_idx: u32,
        policy_name: &str,
        capacity_bytes: u64,
        config: &PolicyConfig,
    ) -> Result<Self> {
        let policy = create_policy(policy_name, config)?;
        Ok(Self::with_policy(edge_idx, policy, capacity_bytes))
    }

    /// Create a cache around an existing policy instance
    pub fn with_policy(edge_idx: u32, policy: Box<dyn CachePolicy>, capacity_bytes: u64) -> Self {
        Self {
            edge_idx,
            capacity_bytes,
            policy_name: policy.name(),
            fine_grained: policy.has_fine_grained_management(),
            state: RwLock::new(CacheState {
                policy,
                validity: HashMap::new(),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    pub fn policy_name(&self) -> &'static str {
        self.policy_name
    }

    /// Object-level (true) or segment-level (false) eviction
    pub fn has_fine_grained_management(&self) -> bool {
        self.fine_grained
    }

    /// Whether admission skips the beacon placement handshake
    pub fn need_independent_admit(&self, key: &Key) -> bool {
        self.state.read().policy.need_independent_admit(key)
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    pub fn exists(&self, key: &Key) -> bool {
        self.state.read().policy.exists(key)
    }

    /// `None` when not cached, otherwise the validity flag
    pub fn validity(&self, key: &Key) -> Option<bool> {
        let state = self.state.read();
        if !state.policy.exists(key) {
            return None;
        }
        Some(state.validity.get(key).copied().unwrap_or(false))
    }

    /// Look up a key, updating policy metadata when cached
    pub fn get(&self, key: &Key, is_redirected: bool) -> LocalGet {
        let mut state = self.state.write();
        let Some(value) = state.policy.get(key, is_redirected) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return LocalGet {
                value: None,
                is_cached: false,
                is_valid: false,
            };
        };
        let is_valid = state.validity.get(key).copied().unwrap_or(false);
        if is_valid {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        LocalGet {
            value: is_valid.then_some(value),
            is_cached: true,
            is_valid,
        }
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Replace the value of a cached key; a successful update revalidates it
    pub fn update(&self, key: &Key, value: Value) -> UpdateOutcome {
        let mut state = self.state.write();
        let outcome = state.policy.update(key, value);
        if outcome.is_successful() {
            state.validity.insert(key.clone(), true);
        }
        outcome
    }

    /// Replace a cached value with a tombstone
    pub fn remove(&self, key: &Key) -> UpdateOutcome {
        self.update(key, Value::deleted())
    }

    /// Admit a key that is not cached yet
    pub fn admit(&self, key: Key, value: Value, is_valid: bool) -> AdmitOutcome {
        if object_charge(&key, &value) > self.capacity_bytes {
            debug!(
                "Edge {} rejects {}: {} bytes exceed capacity {}",
                self.edge_idx,
                key,
                object_charge(&key, &value),
                self.capacity_bytes
            );
            return AdmitOutcome::Rejected;
        }
        let mut state = self.state.write();
        let outcome = state.policy.admit(key.clone(), value);
        if outcome.is_admitted() {
            state.validity.insert(key, is_valid);
            self.admissions.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Mark a cached key stale; returns whether it was cached
    pub fn invalidate(&self, key: &Key) -> bool {
        self.set_validity(key, false)
    }

    /// Mark a cached key fresh; returns whether it was cached
    pub fn validate(&self, key: &Key) -> bool {
        self.set_validity(key, true)
    }

    fn set_validity(&self, key: &Key, valid: bool) -> bool {
        let mut state = self.state.write();
        if !state.policy.exists(key) {
            return false;
        }
        state.validity.insert(key.clone(), valid);
        true
    }

    /// Flip the sole-copy flag used by reward computation
    pub fn set_neighbor_cached(&self, key: &Key, is_neighbor_cached: bool) {
        self.state
            .write()
            .policy
            .set_neighbor_cached(key, is_neighbor_cached);
    }

    // =========================================================================
    // Capacity
    // =========================================================================

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.read().policy.size_for_capacity()
    }

    pub fn len(&self) -> usize {
        self.state.read().policy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_over_capacity(&self) -> bool {
        self.used_bytes() > self.capacity_bytes
    }

    /// Bytes that can be admitted without evicting
    pub fn cache_margin_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes())
    }

    /// Predict the next victim
    pub fn select_victim(&self) -> Option<Key> {
        self.state.write().policy.select_victim()
    }

    /// Evict `key` if it is still the current victim
    pub fn evict_if_match(&self, key: &Key) -> Result<Option<Value>> {
        if !self.fine_grained {
            return Err(Error::UnsupportedOperation(format!(
                "{} cannot evict the specific key {}",
                self.policy_name, key
            )));
        }
        let mut state = self.state.write();
        let evicted = state.policy.evict_if_match(key)?;
        if evicted.is_some() {
            state.validity.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        Ok(evicted)
    }

    /// Evict until usage fits within capacity
    ///
    /// Fine-grained policies evict one predicted victim at a time, retrying
    /// when the victim changed between selection and commit. Coarse-grained
    /// policies evict a single batch covering the overflow.
    pub fn evict_for_capacity(&self) -> Result<Vec<(Key, Value)>> {
        let mut victims = Vec::new();

        if !self.fine_grained {
            let mut state = self.state.write();
            let used = state.policy.size_for_capacity();
            if used <= self.capacity_bytes {
                return Ok(victims);
            }
            victims = state.policy.evict_batch(used - self.capacity_bytes);
            for (key, _) in &victims {
                state.validity.remove(key);
            }
            self.evictions
                .fetch_add(victims.len() as u64, Ordering::Relaxed);
            if state.policy.size_for_capacity() > self.capacity_bytes {
                return Err(Error::invariant(format!(
                    "edge {} still over capacity after batch eviction",
                    self.edge_idx
                )));
            }
            return Ok(victims);
        }

        let mut retries = 0;
        while self.is_over_capacity() {
            let Some(victim) = self.select_victim() else {
                return Err(Error::invariant(format!(
                    "edge {} over capacity ({} > {}) with no victim",
                    self.edge_idx,
                    self.used_bytes(),
                    self.capacity_bytes
                )));
            };
            match self.evict_if_match(&victim)? {
                Some(value) => {
                    retries = 0;
                    victims.push((victim, value));
                }
                None => {
                    retries += 1;
                    warn!(
                        "Edge {} victim {} changed before eviction (retry {})",
                        self.edge_idx, victim, retries
                    );
                    if retries >= MAX_VICTIM_RETRIES {
                        return Err(Error::Internal(format!(
                            "edge {} could not pin a victim after {} retries",
                            self.edge_idx, retries
                        )));
                    }
                }
            }
        }
        Ok(victims)
    }

    /// Next victims in eviction order
    pub fn victim_cacheinfos(&self, limit: usize) -> Vec<VictimCacheinfo> {
        self.state.read().policy.victim_cacheinfos(limit)
    }

    /// Snapshot of cache statistics
    pub fn stats(&self) -> LocalCacheStats {
        let state = self.state.read();
        LocalCacheStats {
            policy: self.policy_name,
            object_count: state.policy.len(),
            used_bytes: state.policy.size_for_capacity(),
            capacity_bytes: self.capacity_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread;

    fn cache(policy: &str, capacity: u64) -> LocalCache {
        LocalCache::new(0, policy, capacity, &PolicyConfig::default()).unwrap()
    }

    #[test]
    fn test_lru_two_object_capacity() {
        // Keys are one byte, values ten: 11 bytes per object
        let cache = cache("lru", 22);
        let (a, b, c) = (Key::from("A"), Key::from("B"), Key::from("C"));

        cache.admit(a.clone(), Value::new(10), true);
        cache.admit(b.clone(), Value::new(10), true);
        assert!(cache.evict_for_capacity().unwrap().is_empty());

        cache.admit(c.clone(), Value::new(10), true);
        let victims = cache.evict_for_capacity().unwrap();
        assert_eq!(victims, vec![(a.clone(), Value::new(10))]);

        assert!(!cache.exists(&a));
        assert!(cache.exists(&b));
        assert!(cache.exists(&c));
        assert!(cache.used_bytes() <= cache.capacity_bytes());
    }

    #[test]
    fn test_invalid_copy_is_not_served() {
        let cache = cache("lru", 1000);
        let key = Key::from("k");
        cache.admit(key.clone(), Value::new(10), false);

        let got = cache.get(&key, false);
        assert!(got.is_cached);
        assert!(!got.is_valid);
        assert!(!got.is_hit());

        assert!(cache.update(&key, Value::new(12)).is_successful());
        let got = cache.get(&key, false);
        assert_eq!(got.value, Some(Value::new(12)));

        assert!(cache.invalidate(&key));
        assert_eq!(cache.validity(&key), Some(false));
        assert!(cache.validate(&key));
        assert_eq!(cache.validity(&key), Some(true));
        assert!(!cache.invalidate(&Key::from("missing")));
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let cache = cache("sieve", 1000);
        let key = Key::from("k");
        cache.admit(key.clone(), Value::new(10), true);
        assert!(cache.remove(&key).is_successful());
        assert_eq!(cache.get(&key, false).value, Some(Value::deleted()));
        assert_eq!(cache.used_bytes(), 1);
    }

    #[test]
    fn test_object_larger_than_cache_is_rejected() {
        let cache = cache("lfu", 10);
        assert_eq!(
            cache.admit(Key::from("big"), Value::new(10), true),
            AdmitOutcome::Rejected
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_coarse_grained_eviction() {
        let config = PolicyConfig {
            segment_bytes: 20,
            ..Default::default()
        };
        let cache = LocalCache::new(0, "segment", 40, &config).unwrap();
        assert!(!cache.has_fine_grained_management());

        for i in 0..5 {
            cache.admit(Key::from(format!("k{}", i)), Value::new(8), true);
        }
        let victims = cache.evict_for_capacity().unwrap();
        assert_eq!(victims.len(), 2);
        assert!(cache.used_bytes() <= 40);

        assert_matches!(
            cache.evict_if_match(&Key::from("k4")),
            Err(Error::UnsupportedOperation(_))
        );
    }

    #[test]
    fn test_concurrent_admissions_respect_capacity() {
        let cache = Arc::new(cache("sieve", 500));
        // Mirrors the edge-wide eviction lock
        let evict_lock = Arc::new(Mutex::new(()));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                let evict_lock = Arc::clone(&evict_lock);
                thread::spawn(move || {
                    for i in 0..100 {
                        let key = Key::from(format!("t{}-{:03}", t, i));
                        cache.admit(key.clone(), Value::new(20), true);
                        cache.get(&key, false);
                        let _guard = evict_lock.lock();
                        cache.evict_for_capacity().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        cache.evict_for_capacity().unwrap();
        assert!(cache.used_bytes() <= 500);

        let stats = cache.stats();
        assert_eq!(stats.admissions, 400);
        assert_eq!(stats.object_count as u64, 400 - stats.evictions);
    }
}
