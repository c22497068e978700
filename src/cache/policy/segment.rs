//! Segment Policy
//!
//! Coarse-grained FIFO: objects are appended to fixed-byte segments and
//! eviction drops whole segments, oldest first. A specific key cannot be
//! targeted, so `evict_if_match` is unsupported and callers go through
//! `evict_batch`.

use std::collections::{HashMap, VecDeque};

use tracing::{debug, warn};

use super::{object_charge, AdmitOutcome, CachePolicy, PolicyConfig, UpdateOutcome};
use crate::cache::key_value::{Key, Value};
use crate::error::{Error, Result};

#[derive(Debug)]
struct Segment {
    id: u64,
    keys: Vec<Key>,
    bytes: u64,
}

/// Segment-granularity FIFO eviction
pub struct SegmentPolicy {
    config: PolicyConfig,
    objects: HashMap<Key, (Value, u64)>,
    segments: VecDeque<Segment>,
    next_segment_id: u64,
    size: u64,
}

impl SegmentPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            objects: HashMap::new(),
            segments: VecDeque::new(),
            next_segment_id: 0,
            size: 0,
        }
    }

    /// Number of open segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn segment_mut(&mut self, id: u64) -> Option<&mut Segment> {
        self.segments.iter_mut().find(|s| s.id == id)
    }
}

impl CachePolicy for SegmentPolicy {
    fn name(&self) -> &'static str {
        "segment"
    }

    fn has_fine_grained_management(&self) -> bool {
        false
    }

    fn exists(&self, key: &Key) -> bool {
        self.objects.contains_key(key)
    }

    fn get(&mut self, key: &Key, _is_redirected: bool) -> Option<Value> {
        self.objects.get(key).map(|(value, _)| *value)
    }

    fn update(&mut self, key: &Key, value: Value) -> UpdateOutcome {
        let Some(&(old, segment_id)) = self.objects.get(key) else {
            return UpdateOutcome::NotCached;
        };
        if !self.config.accepts(&value) {
            return UpdateOutcome::Rejected;
        }
        let old_charge = object_charge(key, &old);
        let new_charge = object_charge(key, &value);
        if let Some(segment) = self.segment_mut(segment_id) {
            segment.bytes = segment.bytes - old_charge + new_charge;
        }
        self.size = self.size - old_charge + new_charge;
        self.objects.insert(key.clone(), (value, segment_id));
        UpdateOutcome::Updated
    }

    fn admit(&mut self, key: Key, value: Value) -> AdmitOutcome {
        if self.objects.contains_key(&key) {
            warn!("key {} already admitted into segment policy", key);
            return AdmitOutcome::AlreadyCached;
        }
        if !self.config.accepts(&value) {
            return AdmitOutcome::Rejected;
        }
        let charge = object_charge(&key, &value);
        let needs_new = match self.segments.back() {
            Some(seg) => !seg.keys.is_empty() && seg.bytes + charge > self.config.segment_bytes,
            None => true,
        };
        if needs_new {
            let id = self.next_segment_id;
            self.next_segment_id += 1;
            self.segments.push_back(Segment {
                id,
                keys: Vec::new(),
                bytes: 0,
            });
        }
        let Some(segment) = self.segments.back_mut() else {
            return AdmitOutcome::Rejected;
        };
        segment.keys.push(key.clone());
        segment.bytes += charge;
        let segment_id = segment.id;
        self.size += charge;
        self.objects.insert(key, (value, segment_id));
        AdmitOutcome::Admitted
    }

    fn select_victim(&mut self) -> Option<Key> {
        self.segments.front().and_then(|s| s.keys.first().cloned())
    }

    fn evict_if_match(&mut self, key: &Key) -> Result<Option<Value>> {
        Err(Error::UnsupportedOperation(format!(
            "segment policy cannot evict the specific key {}",
            key
        )))
    }

    fn evict_batch(&mut self, required_bytes: u64) -> Vec<(Key, Value)> {
        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < required_bytes {
            let Some(segment) = self.segments.pop_front() else {
                break;
            };
            debug!(
                "Evicting segment {} ({} objects, {} bytes)",
                segment.id,
                segment.keys.len(),
                segment.bytes
            );
            freed += segment.bytes;
            self.size -= segment.bytes;
            for key in segment.keys {
                if let Some((value, _)) = self.objects.remove(&key) {
                    victims.push((key, value));
                }
            }
        }
        victims
    }

    fn size_for_capacity(&self) -> u64 {
        self.size
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn policy(segment_bytes: u64) -> SegmentPolicy {
        SegmentPolicy::new(PolicyConfig {
            segment_bytes,
            ..Default::default()
        })
    }

    #[test]
    fn test_objects_fill_segments_in_order() {
        let mut seg = policy(30);
        for i in 0..5 {
            seg.admit(Key::from(format!("k{}", i)), Value::new(8));
        }
        // 10 bytes each, three per segment
        assert_eq!(seg.segment_count(), 2);
        assert_eq!(seg.select_victim(), Some(Key::from("k0")));
    }

    #[test]
    fn test_specific_key_eviction_is_unsupported() {
        let mut seg = policy(30);
        let key = Key::from("k");
        seg.admit(key.clone(), Value::new(8));
        assert_matches!(
            seg.evict_if_match(&key),
            Err(Error::UnsupportedOperation(_))
        );
        assert!(seg.exists(&key));
    }

    #[test]
    fn test_batch_eviction_drops_whole_segments() {
        let mut seg = policy(30);
        for i in 0..5 {
            seg.admit(Key::from(format!("k{}", i)), Value::new(8));
        }
        let victims = seg.evict_batch(1);
        assert_eq!(victims.len(), 3);
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.size_for_capacity(), 20);
        assert!(!seg.exists(&Key::from("k2")));
        assert!(seg.exists(&Key::from("k3")));
    }

    #[test]
    fn test_oversized_object_gets_own_segment() {
        let mut seg = policy(16);
        seg.admit(Key::from("big"), Value::new(40));
        seg.admit(Key::from("s"), Value::new(2));
        assert_eq!(seg.segment_count(), 2);
    }
}
