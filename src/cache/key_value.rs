//! Key/Value Model
//!
//! Keys are opaque byte strings with a pre-computed FxHash; values carry only
//! a size and a deletion marker, since payloads are never materialized.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Fast non-cryptographic hash (FxHash algorithm)
///
/// Shared by beacon selection and worker sharding, so it must stay a pure
/// function of the bytes.
#[inline]
pub fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

// =============================================================================
// Key
// =============================================================================

/// Cache key - opaque bytes compared bytewise
#[derive(Clone)]
pub struct Key {
    hash: u64,
    bytes: Bytes,
}

impl Key {
    /// Create a key from anything convertible into bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            hash: fx_hash(&bytes),
            bytes,
        }
    }

    /// Raw bytes of the key
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Pre-computed FxHash of the key bytes
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Key length in bytes (counted against cache capacity)
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::new(Bytes::from(s))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

// =============================================================================
// Value
// =============================================================================

/// Size-only value with a deletion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Value {
    size: u32,
    deleted: bool,
}

impl Value {
    /// A live value of the given size
    pub fn new(size: u32) -> Self {
        Self {
            size,
            deleted: false,
        }
    }

    /// A tombstone; always zero-sized
    pub fn deleted() -> Self {
        Self {
            size: 0,
            deleted: true,
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

// =============================================================================
// Hitflag
// =============================================================================

/// Where a request was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Hitflag {
    /// Served by the local edge cache
    LocalHit,
    /// Served by a neighbor edge via redirection
    CooperativeHit,
    /// A neighbor had it, but the copy was stale due to a concurrent write
    CooperativeInvalid,
    /// Not cached anywhere; served by the cloud
    GlobalMiss,
}

impl Hitflag {
    /// Label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Hitflag::LocalHit => "local_hit",
            Hitflag::CooperativeHit => "cooperative_hit",
            Hitflag::CooperativeInvalid => "cooperative_invalid",
            Hitflag::GlobalMiss => "global_miss",
        }
    }
}

impl fmt::Display for Hitflag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_is_bytewise() {
        let a = Key::from("object-1");
        let b = Key::new(Bytes::from_static(b"object-1"));
        let c = Key::from("object-2");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash_value(), b.hash_value());

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![Key::from("b"), Key::from("a"), Key::from("ab")];
        keys.sort();
        let names: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["a", "ab", "b"]);
    }

    #[test]
    fn test_fx_hash_is_stable() {
        assert_eq!(fx_hash(b"hello"), fx_hash(b"hello"));
        assert_ne!(fx_hash(b"hello"), fx_hash(b"hellp"));
        assert_eq!(fx_hash(b""), 0x517cc1b727220a95);
    }

    #[test]
    fn test_value_tombstone() {
        let v = Value::new(128);
        assert_eq!(v.size(), 128);
        assert!(!v.is_deleted());

        let d = Value::deleted();
        assert_eq!(d.size(), 0);
        assert!(d.is_deleted());
    }

    #[test]
    fn test_hitflag_labels() {
        assert_eq!(Hitflag::LocalHit.to_string(), "local_hit");
        assert_eq!(Hitflag::CooperativeInvalid.as_str(), "cooperative_invalid");
    }
}
