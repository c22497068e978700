//! Victim cache information

use crate::cache::key_value::Key;

/// One candidate for the next eviction at some edge
#[derive(Debug, Clone, PartialEq)]
pub struct VictimCacheinfo {
    pub key: Key,
    /// Value size in bytes
    pub object_size: u32,
    pub local_cached_popularity: f64,
    pub redirected_cached_popularity: f64,
    /// Eviction cost at the owning edge; lower is evicted first
    pub local_reward: f64,
    /// Set in delta syncsets for entries the receiver must drop
    pub stale: bool,
}

impl VictimCacheinfo {
    /// Marker telling the receiver this key is no longer a victim
    pub fn stale_marker(key: Key) -> Self {
        Self {
            key,
            object_size: 0,
            local_cached_popularity: 0.0,
            redirected_cached_popularity: 0.0,
            local_reward: 0.0,
            stale: true,
        }
    }

    /// Whether any tracked field differs
    pub fn differs_from(&self, other: &VictimCacheinfo) -> bool {
        self.object_size != other.object_size
            || self.local_cached_popularity != other.local_cached_popularity
            || self.redirected_cached_popularity != other.redirected_cached_popularity
            || self.local_reward != other.local_reward
    }
}
