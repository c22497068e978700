//! LRU Policy
//!
//! Recency is a monotonically increasing tick; the ordered tick index gives
//! the least recently used key in O(log n).

use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use super::{object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome};
use crate::cache::key_value::{Key, Value};
use crate::error::Result;

#[derive(Debug)]
struct LruEntry {
    value: Value,
    tick: u64,
}

/// Least-recently-used eviction
pub struct LruPolicy {
    config: PolicyConfig,
    entries: HashMap<Key, LruEntry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, Key>,
    next_tick: u64,
    size: u64,
}

impl LruPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            size: 0,
        }
    }

    fn bump(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn touch(&mut self, key: &Key) {
        let tick = self.bump();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }
}

impl CachePolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&mut self, key: &Key, _is_redirected: bool) -> Option<Value> {
        let value = self.entries.get(key)?.value;
        self.touch(key);
        Some(value)
    }

    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome {
        if !self.entries.contains_key(key) {
            return UpdateOutcome::NotCached;
        }
        if !self.config.accepts(&value) {
            return UpdateOutcome::Rejected;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            self.size -= object_charge(key, &entry.value);
            self.size += object_charge(key, &value);
            entry.value = value;
        }
        self.touch(key);
        UpdateOutcome::Updated
    }

    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome {
        if self.entries.contains_key(&key) {
            warn!("key {} already admitted into lru", key);
            return AdmitOutcome::AlreadyCached;
        }
        if !self.config.accepts(&value) {
            return AdmitOutcome::Rejected;
        }
        let tick = self.bump();
        self.size += object_charge(&key, &value);
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, LruEntry { value, tick });
        AdmitOutcome::Admitted
    }

    fn select_victim(&mut self) -> Option<Key> {
        self.recency.values().next().cloned()
    }

    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>> {
        match self.select_victim() {
            Some(victim) if &victim == key => {}
            _ => return Ok(None),
        }
        let Some(entry) = self.entries.remove(key) else {
            return Ok(None);
        };
        self.recency.remove(&entry.tick);
        self.size -= object_charge(key, &entry.value);
        Ok(Some(entry.value))
    }

    fn size_for_capacity(&self) -> u64 {
        self.size
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_evicts_least_recent() {
        let mut lru = LruPolicy::new(PolicyConfig::default());
        let (a, b, c) = (Key::from("a"), Key::from("b"), Key::from("c"));
        lru.admit(a.clone(), Value::new(1));
        lru.admit(b.clone(), Value::new(1));
        lru.admit(c.clone(), Value::new(1));

        assert_eq!(lru.select_victim(), Some(a.clone()));

        // Touching a moves it to the front
        lru.get(&a, false);
        assert_eq!(lru.select_victim(), Some(b.clone()));

        assert_eq!(lru.evict_if_match(&b).unwrap(), Some(Value::new(1)));
        assert!(!lru.exists(&b));
        assert_eq!(lru.select_victim(), Some(c));
    }

    #[test]
    fn test_lru_stale_victim_is_not_committed() {
        let mut lru = LruPolicy::new(PolicyConfig::default());
        let (a, b) = (Key::from("a"), Key::from("b"));
        lru.admit(a.clone(), Value::new(1));
        lru.admit(b.clone(), Value::new(1));

        let predicted = lru.select_victim().unwrap();
        assert_eq!(predicted, a);

        // a gets hit between selection and commit
        lru.get(&a, false);
        assert_eq!(lru.evict_if_match(&predicted).unwrap(), None);
        assert!(lru.exists(&a));
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn test_lru_update_refreshes_recency() {
        let mut lru = LruPolicy::new(PolicyConfig::default());
        let (a, b) = (Key::from("a"), Key::from("b"));
        lru.admit(a.clone(), Value::new(1));
        lru.admit(b.clone(), Value::new(1));
        lru.update(&a, Value::new(2));
        assert_eq!(lru.select_victim(), Some(b));
    }
}
