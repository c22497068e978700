//! Property-Based Tests for Local Caching
//!
//! # Test Properties
//!
//! 1. **Capacity**: after every eviction-for-capacity pass, used bytes never
//!    exceed capacity, for every policy and any operation sequence
//! 2. **Accounting**: used bytes always equal the sum of cached object charges
//! 3. **LFU Frequency**: n hits after admission leave frequency at n+1
//! 4. **SIEVE Determinism**: identical operation sequences produce identical
//!    victim sequences

#![cfg(test)]

use proptest::prelude::*;

use super::key_value::{Key, Value};
use super::local_cache::LocalCache;
use super::policy::{CachePolicy, LfuPolicy, PolicyConfig, SievePolicy};

// =============================================================================
// Property Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Admit(u8, u32),
    Get(u8),
    Update(u8, u32),
    Remove(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..32, 1u32..64).prop_map(|(k, s)| Op::Admit(k, s)),
        (0u8..32).prop_map(Op::Get),
        (0u8..32, 1u32..64).prop_map(|(k, s)| Op::Update(k, s)),
        (0u8..32).prop_map(Op::Remove),
    ]
}

fn policy_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("lru"),
        Just("lfu"),
        Just("sieve"),
        Just("cooperative"),
        Just("segment"),
    ]
}

fn key(k: u8) -> Key {
    Key::from(format!("key-{:02}", k))
}

// =============================================================================
// Capacity Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Eviction-for-capacity always restores the byte budget
    #[test]
    fn prop_capacity_invariant(
        policy in policy_strategy(),
        capacity in 100u64..600,
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let config = PolicyConfig {
            segment_bytes: 128,
            ..Default::default()
        };
        let cache = LocalCache::new(0, policy, capacity, &config).unwrap();

        for op in ops {
            match op {
                Op::Admit(k, size) => {
                    if !cache.exists(&key(k)) {
                        cache.admit(key(k), Value::new(size), true);
                    }
                }
                Op::Get(k) => {
                    cache.get(&key(k), false);
                }
                Op::Update(k, size) => {
                    cache.update(&key(k), Value::new(size));
                }
                Op::Remove(k) => {
                    cache.remove(&key(k));
                }
            }
            cache.evict_for_capacity().unwrap();
            prop_assert!(
                cache.used_bytes() <= cache.capacity_bytes(),
                "{} used {} > capacity {}",
                policy,
                cache.used_bytes(),
                cache.capacity_bytes()
            );
        }
    }

    /// Evicted objects are gone and the remaining bytes add up
    #[test]
    fn prop_eviction_accounting(
        policy in policy_strategy(),
        sizes in prop::collection::vec(1u32..64, 1..40),
    ) {
        let cache = LocalCache::new(0, policy, 200, &PolicyConfig::default()).unwrap();
        let mut total = 0u64;
        for (i, size) in sizes.iter().enumerate() {
            let k = key(i as u8);
            cache.admit(k.clone(), Value::new(*size), true);
            total += k.len() as u64 + *size as u64;
        }

        let victims = cache.evict_for_capacity().unwrap();
        let freed: u64 = victims
            .iter()
            .map(|(k, v)| k.len() as u64 + v.size() as u64)
            .sum();
        prop_assert_eq!(cache.used_bytes(), total - freed);
        for (k, _) in &victims {
            prop_assert!(!cache.exists(k));
        }
    }
}

// =============================================================================
// Policy Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_lfu_frequency_is_hits_plus_one(hits in prop::collection::vec(0u8..8, 0..100)) {
        let mut lfu = LfuPolicy::new(PolicyConfig::default());
        for k in 0..8u8 {
            lfu.admit(key(k), Value::new(4));
        }
        let mut expected = [1u64; 8];
        for k in hits {
            lfu.get(&key(k), false);
            expected[k as usize] += 1;
        }
        for k in 0..8u8 {
            prop_assert_eq!(lfu.frequency(&key(k)), Some(expected[k as usize]));
        }
    }

    #[test]
    fn prop_sieve_victims_are_deterministic(ops in prop::collection::vec(op_strategy(), 1..100)) {
        let run = |ops: &[Op]| {
            let mut sieve = SievePolicy::new(PolicyConfig::default());
            let mut victims = Vec::new();
            for op in ops {
                match op {
                    Op::Admit(k, size) => {
                        sieve.admit(key(*k), Value::new(*size));
                    }
                    Op::Get(k) => {
                        sieve.get(&key(*k), false);
                    }
                    Op::Update(k, size) => {
                        sieve.update(&key(*k), Value::new(*size));
                    }
                    Op::Remove(_) => {
                        if let Some(victim) = sieve.select_victim() {
                            sieve.evict_if_match(&victim).unwrap();
                            victims.push(victim);
                        }
                    }
                }
            }
            victims
        };
        prop_assert_eq!(run(&ops), run(&ops));
    }
}
