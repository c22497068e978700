//! Cooperative Policy
//!
//! Eviction order driven by a per-object *local reward*, with two structures
//! layered on the object table:
//!
//! - **Group-level statistics**: objects are bucketed by admission order; a
//!   new group opens once the current one has accepted `group_size` keys.
//!   Popularity divides a key's frequency by its group's average object size,
//!   so size bookkeeping stays per group rather than per object.
//! - **Sorted reward index**: an ascending `(reward, admission)` multimap
//!   answering "who is evicted next" and "what are my next N victims" (the
//!   latter feeds victim syncsets sent to neighbors).
//!
//! The local reward of a sole copy counts both local and redirected hits; once
//! a neighbor also caches the object only local hits count, since evicting it
//! here no longer loses the cooperative hits.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use super::{object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome};
use crate::cache::key_value::{Key, Value};
use crate::error::Result;
use crate::victim::VictimCacheinfo;

/// Totally ordered reward score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reward(pub f64);

impl Eq for Reward {}

impl PartialOrd for Reward {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reward {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug)]
struct KeyLevelMetadata {
    value: Value,
    group_id: u64,
    seq: u64,
    local_frequency: u64,
    redirected_frequency: u64,
    is_neighbor_cached: bool,
    local_popularity: f64,
    redirected_popularity: f64,
    reward: Reward,
}

#[derive(Debug, Default, Clone, Copy)]
struct GroupLevelMetadata {
    object_count: u64,
    total_object_size: u64,
    total_frequency: u64,
}

impl GroupLevelMetadata {
    fn avg_object_size(&self) -> f64 {
        if self.object_count == 0 {
            0.0
        } else {
            self.total_object_size as f64 / self.object_count as f64
        }
    }
}

/// Grouped-statistics policy used by cooperative edges
pub struct CooperativePolicy {
    config: PolicyConfig,
    keys: HashMap<Key, KeyLevelMetadata>,
    groups: HashMap<u64, GroupLevelMetadata>,
    sorted: BTreeSet<(Reward, u64, Key)>,
    current_group: u64,
    current_group_admits: usize,
    next_seq: u64,
    size: u64,
}

impl CooperativePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            keys: HashMap::new(),
            groups: HashMap::new(),
            sorted: BTreeSet::new(),
            current_group: 0,
            current_group_admits: 0,
            next_seq: 0,
            size: 0,
        }
    }

    fn popularity(frequency: u64, avg_object_size: f64) -> f64 {
        if avg_object_size == 0.0 {
            0.0
        } else {
            frequency as f64 / avg_object_size
        }
    }

    /// Recompute popularity and reward of one key and re-sort it
    fn refresh(&mut self, key: &Key) {
        let Some(meta) = self.keys.get_mut(key) else {
            return;
        };
        let avg = self
            .groups
            .get(&meta.group_id)
            .map(|g| g.avg_object_size())
            .unwrap_or(0.0);

        self.sorted.remove(&(meta.reward, meta.seq, key.clone()));

        meta.local_popularity = Self::popularity(meta.local_frequency, avg);
        meta.redirected_popularity = Self::popularity(meta.redirected_frequency, avg);
        let mut reward = self.config.local_hit_weight * meta.local_popularity;
        if !meta.is_neighbor_cached {
            reward += self.config.cooperative_hit_weight * meta.redirected_popularity;
        }
        meta.reward = Reward(reward);

        self.sorted.insert((meta.reward, meta.seq, key.clone()));
    }

    /// Group a cached key belongs to
    pub fn group_of(&self, key: &Key) -> Option<u64> {
        self.keys.get(key).map(|m| m.group_id)
    }

    /// Number of live groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Current local reward of a cached key
    pub fn reward_of(&self, key: &Key) -> Option<f64> {
        self.keys.get(key).map(|m| m.reward.0)
    }
}

impl CachePolicy for CooperativePolicy {
    fn name(&self) -> &'static str {
        "cooperative"
    }

    fn need_independent_admit(&self, _key: &Key) -> bool {
        false
    }

    fn exists(&self, key: &Key) -> bool {
        self.keys.contains_key(key)
    }

    fn get(&mut self, key: &Key, is_redirected: bool) -> Option<Value> {
        let meta = self.keys.get_mut(key)?;
        if is_redirected {
            meta.redirected_frequency += 1;
        } else {
            meta.local_frequency += 1;
        }
        let value = meta.value;
        if let Some(group) = self.groups.get_mut(&meta.group_id) {
            group.total_frequency += 1;
        }
        self.refresh(key);
        Some(value)
    }

    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome {
        let Some(meta) = self.keys.get_mut(key) else {
            return UpdateOutcome::NotCached;
        };
        if !self.config.accepts(&value) {
            return UpdateOutcome::Rejected;
        }
        let old_charge = object_charge(key, &meta.value);
        let new_charge = object_charge(key, &value);
        meta.value = value;
        if let Some(group) = self.groups.get_mut(&meta.group_id) {
            group.total_object_size = group.total_object_size - old_charge + new_charge;
        }
        self.size = self.size - old_charge + new_charge;
        self.refresh(key);
        UpdateOutcome::Updated
    }

    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome {
        if self.keys.contains_key(&key) {
            warn!("key {} already admitted into cooperative policy", key);
            return AdmitOutcome::AlreadyCached;
        }
        if !self.config.accepts(&value) {
            return AdmitOutcome::Rejected;
        }

        if self.current_group_admits >= self.config.group_size.max(1) {
            self.current_group += 1;
            self.current_group_admits = 0;
        }
        self.current_group_admits += 1;

        let charge = object_charge(&key, &value);
        let group = self.groups.entry(self.current_group).or_default();
        group.object_count += 1;
        group.total_object_size += charge;
        group.total_frequency += 1;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.size += charge;
        self.keys.insert(
            key.clone(),
            KeyLevelMetadata {
                value,
                group_id: self.current_group,
                seq,
                local_frequency: 1,
                redirected_frequency: 0,
                is_neighbor_cached: false,
                local_popularity: 0.0,
                redirected_popularity: 0.0,
                reward: Reward(0.0),
            },
        );
        self.sorted.insert((Reward(0.0), seq, key.clone()));
        self.refresh(&key);
        AdmitOutcome::Admitted
    }

    fn select_victim(&mut self) -> Option<Key> {
        self.sorted.iter().next().map(|(_, _, key)| key.clone())
    }

    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>> {
        match self.select_victim() {
            Some(victim) if &victim == key => {}
            _ => return Ok(None),
        }
        let Some(meta) = self.keys.remove(key) else {
            return Ok(None);
        };
        self.sorted.remove(&(meta.reward, meta.seq, key.clone()));

        let charge = object_charge(key, &meta.value);
        self.size -= charge;
        let drained = match self.groups.get_mut(&meta.group_id) {
            Some(group) => {
                group.object_count -= 1;
                group.total_object_size -= charge;
                group.total_frequency = group
                    .total_frequency
                    .saturating_sub(meta.local_frequency + meta.redirected_frequency);
                group.object_count == 0
            }
            None => false,
        };
        if drained {
            self.groups.remove(&meta.group_id);
        }
        Ok(Some(meta.value))
    }

    fn size_for_capacity(&self) -> u64 {
        self.size
    }

    fn len(&self) -> usize {
        self.keys.len()
    }

    fn victim_cacheinfos(&self, limit: usize) -> Vec<VictimCacheinfo> {
        self.sorted
            .iter()
            .take(limit)
            .filter_map(|(_, _, key)| {
                let meta = self.keys.get(key)?;
                Some(VictimCacheinfo {
                    key: key.clone(),
                    object_size: meta.value.size(),
                    local_cached_popularity: meta.local_popularity,
                    redirected_cached_popularity: meta.redirected_popularity,
                    local_reward: meta.reward.0,
                    stale: false,
                })
            })
            .collect()
    }

    fn set_neighbor_cached(&mut self, key: &Key, is_neighbor_cached: bool) {
        if let Some(meta) = self.keys.get_mut(key) {
            meta.is_neighbor_cached = is_neighbor_cached;
            self.refresh(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(group_size: usize) -> CooperativePolicy {
        CooperativePolicy::new(PolicyConfig {
            group_size,
            ..Default::default()
        })
    }

    #[test]
    fn test_group_id_advances_every_n_admits() {
        let mut coop = policy(3);
        for i in 0..7 {
            coop.admit(Key::from(format!("k{}", i)), Value::new(10));
        }
        assert_eq!(coop.group_of(&Key::from("k0")), Some(0));
        assert_eq!(coop.group_of(&Key::from("k2")), Some(0));
        assert_eq!(coop.group_of(&Key::from("k3")), Some(1));
        assert_eq!(coop.group_of(&Key::from("k6")), Some(2));
        assert_eq!(coop.group_count(), 3);
    }

    #[test]
    fn test_default_group_size_is_ten() {
        let mut coop = CooperativePolicy::new(PolicyConfig::default());
        for i in 0..11 {
            coop.admit(Key::from(format!("k{:02}", i)), Value::new(1));
        }
        assert_eq!(coop.group_of(&Key::from("k09")), Some(0));
        assert_eq!(coop.group_of(&Key::from("k10")), Some(1));
    }

    #[test]
    fn test_least_rewarded_key_is_victim() {
        let mut coop = policy(10);
        let (a, b, c) = (Key::from("a"), Key::from("b"), Key::from("c"));
        for key in [&a, &b, &c] {
            coop.admit(key.clone(), Value::new(9));
        }
        // Equal rewards: oldest admission first
        assert_eq!(coop.select_victim(), Some(a.clone()));

        coop.get(&a, false);
        coop.get(&b, false);
        assert_eq!(coop.select_victim(), Some(c.clone()));

        let victims = coop.victim_cacheinfos(2);
        assert_eq!(victims.len(), 2);
        assert_eq!(victims[0].key, c);
        assert_eq!(victims[1].key, a);
        assert!(victims[0].local_reward <= victims[1].local_reward);
    }

    #[test]
    fn test_redirected_hits_count_only_for_sole_copy() {
        let mut coop = policy(10);
        let key = Key::from("k");
        coop.admit(key.clone(), Value::new(9));
        coop.get(&key, true);
        coop.get(&key, true);
        let sole = coop.reward_of(&key).unwrap();

        coop.set_neighbor_cached(&key, true);
        let shared = coop.reward_of(&key).unwrap();
        assert!(shared < sole);

        coop.set_neighbor_cached(&key, false);
        assert_eq!(coop.reward_of(&key), Some(sole));
    }

    #[test]
    fn test_empty_groups_are_dropped() {
        let mut coop = policy(2);
        let keys: Vec<Key> = (0..4).map(|i| Key::from(format!("k{}", i))).collect();
        for key in &keys {
            coop.admit(key.clone(), Value::new(4));
        }
        assert_eq!(coop.group_count(), 2);

        let mut evicted = 0;
        while evicted < 2 {
            let victim = coop.select_victim().unwrap();
            coop.evict_if_match(&victim).unwrap().unwrap();
            evicted += 1;
        }
        assert_eq!(coop.group_count(), 1);
        assert_eq!(coop.size_for_capacity(), 2 * 6);
    }
}
