//! SIEVE Policy
//!
//! One FIFO queue with a visited bit per object and a moving hand.
//!
//! ```text
//!   head (newest)                                   tail (oldest)
//!     ┌───┐   ┌───┐   ┌───┐   ┌───┐   ┌───┐
//!     │ e │ ← │ d │ ← │ c │ ← │ b │ ← │ a │
//!     └───┘   └───┘   └───┘   └───┘   └───┘
//!                       ▲
//!                      hand: scan walks toward the head, wraps to the tail
//! ```
//!
//! Victim selection starts at the hand (or the tail when the hand is unset),
//! clears and skips visited objects, wraps from the head back to the tail,
//! and leaves the hand on the object just newer than the victim. When the
//! victim is the head itself the hand is unset.
//!
//! Nodes live in a slot arena linked by index so the hand can point into the
//! middle of the queue without borrowing it.

use std::collections::HashMap;

use tracing::warn;

use super::{object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome};
use crate::cache::key_value::{Key, Value};
use crate::error::Result;

#[derive(Debug)]
struct SieveNode {
    key: Key,
    value: Value,
    visited: bool,
    /// Neighbor toward the head
    newer: Option<usize>,
    /// Neighbor toward the tail
    older: Option<usize>,
}

/// SIEVE eviction
pub struct SievePolicy {
    config: PolicyConfig,
    slots: Vec<Option<SieveNode>>,
    free: Vec<usize>,
    index: HashMap<Key, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    hand: Option<usize>,
    /// Last selected victim, reusable while it stays unvisited
    pending: Option<usize>,
    size: u64,
}

impl SievePolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            hand: None,
            pending: None,
            size: 0,
        }
    }

    fn node(&self, idx: usize) -> &SieveNode {
        self.slots[idx].as_ref().expect("sieve slot linked but empty")
    }

    fn node_mut(&mut self, idx: usize) -> &mut SieveNode {
        self.slots[idx].as_mut().expect("sieve slot linked but empty")
    }

    fn push_head(&mut self, node: SieveNode) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        let old_head = self.head;
        {
            let n = self.node_mut(idx);
            n.newer = None;
            n.older = old_head;
        }
        match old_head {
            Some(h) => self.node_mut(h).newer = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        idx
    }

    fn unlink(&mut self, idx: usize) -> SieveNode {
        let node = self.slots[idx].take().expect("sieve slot linked but empty");
        match node.newer {
            Some(n) => self.node_mut(n).older = node.older,
            None => self.head = node.older,
        }
        match node.older {
            Some(o) => self.node_mut(o).newer = node.newer,
            None => self.tail = node.newer,
        }
        if self.hand == Some(idx) {
            self.hand = node.newer;
        }
        if self.pending == Some(idx) {
            self.pending = None;
        }
        self.free.push(idx);
        node
    }

    /// Run the hand scan and return the victim slot
    fn scan(&mut self) -> Option<usize> {
        let mut idx = self.hand.or(self.tail)?;
        while self.node(idx).visited {
            self.node_mut(idx).visited = false;
            idx = if Some(idx) == self.head {
                self.tail?
            } else {
                self.node(idx).newer?
            };
        }
        self.hand = if Some(idx) == self.head {
            None
        } else {
            self.node(idx).newer
        };
        self.pending = Some(idx);
        Some(idx)
    }

    /// Visited bit of a cached key
    pub fn is_visited(&self, key: &Key) -> Option<bool> {
        self.index.get(key).map(|&idx| self.node(idx).visited)
    }

    /// Key under the hand, if the hand is set
    pub fn hand_key(&self) -> Option<Key> {
        self.hand.map(|idx| self.node(idx).key.clone())
    }
}

impl CachePolicy for SievePolicy {
    fn name(&self) -> &'static str {
        "sieve"
    }

    fn exists(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    fn get(&mut self, key: &Key, _is_redirected: bool) -> Option<Value> {
        let idx = *self.index.get(key)?;
        let node = self.node_mut(idx);
        node.visited = true;
        Some(node.value)
    }

    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome {
        let Some(&idx) = self.index.get(key) else {
            return UpdateOutcome::NotCached;
        };
        if !self.config.accepts(&value) {
            return UpdateOutcome::Rejected;
        }
        let old = self.node(idx).value;
        self.size -= object_charge(key, &old);
        self.size += object_charge(key, &value);
        let node = self.node_mut(idx);
        node.value = value;
        node.visited = true;
        UpdateOutcome::Updated
    }

    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome {
        if self.index.contains_key(&key) {
            warn!("key {} already admitted into sieve", key);
            return AdmitOutcome::AlreadyCached;
        }
        if !self.config.accepts(&value) {
            return AdmitOutcome::Rejected;
        }
        self.size += object_charge(&key, &value);
        let idx = self.push_head(SieveNode {
            key: key.clone(),
            value,
            visited: false,
            newer: None,
            older: None,
        });
        self.index.insert(key, idx);
        AdmitOutcome::Admitted
    }

    fn select_victim(&mut self) -> Option<Key> {
        let idx = self.scan()?;
        Some(self.node(idx).key.clone())
    }

    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>> {
        let current = match self.pending {
            Some(idx) if self.slots[idx].as_ref().is_some_and(|n| !n.visited) => idx,
            _ => match self.scan() {
                Some(idx) => idx,
                None => return Ok(None),
            },
        };
        if &self.node(current).key != key {
            return Ok(None);
        }
        let node = self.unlink(current);
        self.index.remove(key);
        self.size -= object_charge(key, &node.value);
        Ok(Some(node.value))
    }

    fn size_for_capacity(&self) -> u64 {
        self.size
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Key {
        Key::from(s)
    }

    fn evict_next(sieve: &mut SievePolicy) -> Key {
        let victim = sieve.select_victim().unwrap();
        assert!(sieve.evict_if_match(&victim).unwrap().is_some());
        victim
    }

    #[test]
    fn test_sieve_hand_trace() {
        let mut sieve = SievePolicy::new(PolicyConfig::default());
        for name in ["a", "b", "c", "d", "e"] {
            sieve.admit(k(name), Value::new(1));
        }
        // Queue (head..tail): e d c b a
        sieve.get(&k("a"), false);
        sieve.get(&k("c"), false);

        // From the tail: a visited -> cleared, b unvisited -> victim, hand on c
        assert_eq!(evict_next(&mut sieve), k("b"));
        assert_eq!(sieve.hand_key(), Some(k("c")));
        assert_eq!(sieve.is_visited(&k("a")), Some(false));

        sieve.admit(k("f"), Value::new(1));
        sieve.get(&k("e"), false);

        // From c: c visited -> cleared, d victim, hand on e
        assert_eq!(evict_next(&mut sieve), k("d"));
        assert_eq!(sieve.hand_key(), Some(k("e")));

        // From e: e visited -> cleared, f (head) victim, hand unset
        assert_eq!(evict_next(&mut sieve), k("f"));
        assert_eq!(sieve.hand_key(), None);

        // Hand unset: start at tail a
        assert_eq!(evict_next(&mut sieve), k("a"));
        assert_eq!(sieve.hand_key(), Some(k("c")));

        sieve.get(&k("c"), false);
        // From c: visited -> cleared, e (head) victim
        assert_eq!(evict_next(&mut sieve), k("e"));
        assert_eq!(sieve.hand_key(), None);

        assert_eq!(evict_next(&mut sieve), k("c"));
        assert!(sieve.is_empty());
        assert_eq!(sieve.size_for_capacity(), 0);
        assert_eq!(sieve.select_victim(), None);
    }

    #[test]
    fn test_sieve_scan_wraps_from_head_to_tail() {
        let mut sieve = SievePolicy::new(PolicyConfig::default());
        for name in ["a", "b", "c"] {
            sieve.admit(k(name), Value::new(1));
        }
        for name in ["a", "b", "c"] {
            sieve.get(&k(name), false);
        }
        // Every object visited: one full pass clears them, wraps, then a is picked
        assert_eq!(sieve.select_victim(), Some(k("a")));
        assert_eq!(sieve.is_visited(&k("b")), Some(false));
        assert_eq!(sieve.is_visited(&k("c")), Some(false));
    }

    #[test]
    fn test_sieve_visited_victim_is_reselected() {
        let mut sieve = SievePolicy::new(PolicyConfig::default());
        for name in ["a", "b", "c"] {
            sieve.admit(k(name), Value::new(1));
        }
        let predicted = sieve.select_victim().unwrap();
        assert_eq!(predicted, k("a"));

        // Hit between selection and commit
        sieve.get(&k("a"), false);
        assert_eq!(sieve.evict_if_match(&predicted).unwrap(), None);
        assert!(sieve.exists(&k("a")));

        // The fresh scan moved on to b
        assert_eq!(sieve.evict_if_match(&k("b")).unwrap(), Some(Value::new(1)));
    }

    #[test]
    fn test_sieve_reuses_free_slots() {
        let mut sieve = SievePolicy::new(PolicyConfig::default());
        for i in 0..4 {
            sieve.admit(k(&format!("k{}", i)), Value::new(2));
        }
        for _ in 0..2 {
            evict_next(&mut sieve);
        }
        sieve.admit(k("x"), Value::new(2));
        sieve.admit(k("y"), Value::new(2));
        assert_eq!(sieve.slots.len(), 4);
        assert_eq!(sieve.len(), 4);
        assert_eq!(sieve.size_for_capacity(), 2 * 4 + 2 * 3);
    }
}
