//! LFU Policy
//!
//! Keys are ordered by `(frequency, admission sequence)`, so ties among
//! equally frequent keys evict the oldest admission first. Admission starts a
//! key at frequency 1 and every hit adds 1.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use super::{object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome};
use crate::cache::key_value::{Key, Value};
use crate::error::Result;

#[derive(Debug)]
struct LfuEntry {
    value: Value,
    frequency: u64,
    seq: u64,
}

/// Least-frequently-used eviction
pub struct LfuPolicy {
    config: PolicyConfig,
    entries: HashMap<Key, LfuEntry>,
    order: BTreeSet<(u64, u64, Key)>,
    next_seq: u64,
    size: u64,
}

impl LfuPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: BTreeSet::new(),
            next_seq: 0,
            size: 0,
        }
    }

    /// Current access frequency of a cached key
    pub fn frequency(&self, key: &Key) -> Option<u64> {
        self.entries.get(key).map(|e| e.frequency)
    }
}

impl CachePolicy for LfuPolicy {
    fn name(&self) -> &'static str {
        "lfu"
    }

    fn exists(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    fn get(&mut self, key: &Key, _is_redirected: bool) -> Option<Value> {
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&(entry.frequency, entry.seq, key.clone()));
        entry.frequency += 1;
        self.order.insert((entry.frequency, entry.seq, key.clone()));
        Some(entry.value)
    }

    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome {
        let Some(entry) = self.entries.get_mut(key) else {
            return UpdateOutcome::NotCached;
        };
        if !self.config.accepts(&value) {
            return UpdateOutcome::Rejected;
        }
        self.size -= object_charge(key, &entry.value);
        self.size += object_charge(key, &value);
        entry.value = value;
        UpdateOutcome::Updated
    }

    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome {
        if self.entries.contains_key(&key) {
            warn!("key {} already admitted into lfu", key);
            return AdmitOutcome::AlreadyCached;
        }
        if !self.config.accepts(&value) {
            return AdmitOutcome::Rejected;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.size += object_charge(&key, &value);
        self.order.insert((1, seq, key.clone()));
        self.entries.insert(
            key,
            LfuEntry {
                value,
                frequency: 1,
                seq,
            },
        );
        AdmitOutcome::Admitted
    }

    fn select_victim(&mut self) -> Option<Key> {
        self.order.iter().next().map(|(_, _, key)| key.clone())
    }

    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>> {
        match self.select_victim() {
            Some(victim) if &victim == key => {}
            _ => return Ok(None),
        }
        let Some(entry) = self.entries.remove(key) else {
            return Ok(None);
        };
        self.order.remove(&(entry.frequency, entry.seq, key.clone()));
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
    fn test_lfu_frequency_counts_hits() {
        let mut lfu = LfuPolicy::new(PolicyConfig::default());
        let key = Key::from("hot");
        lfu.admit(key.clone(), Value::new(8));
        assert_eq!(lfu.frequency(&key), Some(1));

        for n in 1..=5u64 {
            lfu.get(&key, false);
            assert_eq!(lfu.frequency(&key), Some(n + 1));
        }

        // Misses and updates leave the count alone
        lfu.get(&Key::from("cold"), false);
        lfu.update(&key, Value::new(16));
        assert_eq!(lfu.frequency(&key), Some(6));
    }

    #[test]
    fn test_lfu_ties_evict_oldest_first() {
        let mut lfu = LfuPolicy::new(PolicyConfig::default());
        let keys: Vec<Key> = ["a", "b", "c"].iter().map(|k| Key::from(*k)).collect();
        for key in &keys {
            lfu.admit(key.clone(), Value::new(1));
        }
        assert_eq!(lfu.select_victim(), Some(keys[0].clone()));

        lfu.get(&keys[0], false);
        assert_eq!(lfu.select_victim(), Some(keys[1].clone()));

        lfu.get(&keys[1], false);
        lfu.get(&keys[2], false);
        // All at frequency 2 now; oldest admission wins
        assert_eq!(lfu.select_victim(), Some(keys[0].clone()));
    }

    #[test]
    fn test_lfu_evict_requires_current_victim() {
        let mut lfu = LfuPolicy::new(PolicyConfig::default());
        let (a, b) = (Key::from("a"), Key::from("b"));
        lfu.admit(a.clone(), Value::new(1));
        lfu.admit(b.clone(), Value::new(1));

        assert_eq!(lfu.evict_if_match(&b).unwrap(), None);
        assert_eq!(lfu.evict_if_match(&a).unwrap(), Some(Value::new(1)));
        assert_eq!(lfu.len(), 1);
        assert_eq!(lfu.size_for_capacity(), 2);
    }
}
