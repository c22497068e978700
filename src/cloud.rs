//! Cloud Origin
//!
//! The authoritative store behind every edge. Only value sizes matter, so the
//! in-memory origin keeps a size per key and invents a default size for keys
//! it has never seen, mirroring a pre-populated dataset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::cache::key_value::{Key, Value};
use crate::error::Result;

/// Origin storage port
#[async_trait]
pub trait CloudBackend: Send + Sync {
    /// Fetch the authoritative value; deleted keys yield a tombstone
    async fn get(&self, key: &Key) -> Result<Value>;

    /// Store a value
    async fn put(&self, key: &Key, value: Value) -> Result<()>;

    /// Delete a key
    async fn delete(&self, key: &Key) -> Result<()>;
}

/// Cloud configuration
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Size reported for keys that were never written
    pub default_object_size: u32,
    /// Added to every read
    pub read_latency: Duration,
    /// Added to every write and delete
    pub write_latency: Duration,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            default_object_size: 1024,
            read_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
        }
    }
}

/// Cloud access counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloudStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// DashMap-backed origin
pub struct InMemoryCloud {
    config: CloudConfig,
    objects: DashMap<Key, Value>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new(CloudConfig::default())
    }
}

impl InMemoryCloud {
    pub fn new(config: CloudConfig) -> Self {
        Self {
            config,
            objects: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CloudStats {
        CloudStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl CloudBackend for InMemoryCloud {
    async fn get(&self, key: &Key) -> Result<Value> {
        if !self.config.read_latency.is_zero() {
            tokio::time::sleep(self.config.read_latency).await;
        }
        self.reads.fetch_add(1, Ordering::Relaxed);
        let value = self
            .objects
            .get(key)
            .map(|v| *v)
            .unwrap_or_else(|| Value::new(self.config.default_object_size));
        trace!("Cloud read {} -> {} bytes", key, value.size());
        Ok(value)
    }

    async fn put(&self, key: &Key, value: Value) -> Result<()> {
        if !self.config.write_latency.is_zero() {
            tokio::time::sleep(self.config.write_latency).await;
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        if !self.config.write_latency.is_zero() {
            tokio::time::sleep(self.config.write_latency).await;
        }
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.objects.insert(key.clone(), Value::deleted());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unseen_keys_use_default_size() {
        let cloud = InMemoryCloud::new(CloudConfig {
            default_object_size: 77,
            ..Default::default()
        });
        assert_eq!(cloud.get(&Key::from("k")).await.unwrap(), Value::new(77));
    }

    #[tokio::test]
    async fn test_put_then_delete() {
        let cloud = InMemoryCloud::default();
        let key = Key::from("k");
        cloud.put(&key, Value::new(5)).await.unwrap();
        assert_eq!(cloud.get(&key).await.unwrap(), Value::new(5));

        cloud.delete(&key).await.unwrap();
        assert!(cloud.get(&key).await.unwrap().is_deleted());
        assert_eq!(
            cloud.stats(),
            CloudStats {
                reads: 2,
                writes: 1,
                deletes: 1
            }
        );
    }
}
