//! Edge configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::policy::PolicyConfig;
use crate::error::{Error, Result};

/// Configuration for one edge node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Index of this edge, `0..edgecnt`
    pub edge_idx: u32,
    /// Number of edges in the cluster
    pub edgecnt: u32,
    /// Byte budget of the local cache
    pub capacity_bytes: u64,
    /// Cache policy name (lru, lfu, sieve, cooperative, segment)
    pub policy: String,
    pub policy_config: PolicyConfig,
    /// Worker tasks serving client requests
    pub worker_count: usize,
    /// Capacity of each worker/processor channel
    pub queue_capacity: usize,
    /// Wait for a response before resending
    pub request_timeout_ms: u64,
    /// How often the dispatcher checks the running flag when idle
    pub poll_interval_ms: u64,
    /// Largest placement edgeset, the local edge included
    pub placement_top_k: usize,
    /// Victims advertised per syncset
    pub synced_victim_count: usize,
    /// Pause between write-lock attempts while another writer holds it
    pub writelock_backoff_ms: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            edge_idx: 0,
            edgecnt: 1,
            capacity_bytes: 64 * 1024 * 1024,
            policy: "lru".to_string(),
            policy_config: PolicyConfig::default(),
            worker_count: 4,
            queue_capacity: 1000,
            request_timeout_ms: 500,
            poll_interval_ms: 50,
            placement_top_k: 2,
            synced_victim_count: 16,
            writelock_backoff_ms: 5,
        }
    }
}

impl EdgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.edgecnt == 0 {
            return Err(Error::Config("edgecnt must be at least 1".to_string()));
        }
        if self.edge_idx >= self.edgecnt {
            return Err(Error::Config(format!(
                "edge index {} out of range for {} edges",
                self.edge_idx, self.edgecnt
            )));
        }
        if self.capacity_bytes == 0 {
            return Err(Error::Config("capacity_bytes must be positive".to_string()));
        }
        if self.worker_count == 0 || self.queue_capacity == 0 {
            return Err(Error::Config(
                "worker_count and queue_capacity must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::Config("request_timeout_ms must be positive".to_string()));
        }
        if self.placement_top_k == 0 {
            return Err(Error::Config("placement_top_k must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn writelock_backoff(&self) -> Duration {
        Duration::from_millis(self.writelock_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_is_valid() {
        EdgeConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validation_errors() {
        let config = EdgeConfig {
            edge_idx: 3,
            edgecnt: 3,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));

        let config = EdgeConfig {
            capacity_bytes: 0,
            ..Default::default()
        };
        assert_matches!(config.validate(), Err(Error::Config(_)));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EdgeConfig =
            serde_json::from_str(r#"{"edgecnt": 4, "policy": "cooperative"}"#).unwrap();
        assert_eq!(config.edgecnt, 4);
        assert_eq!(config.policy, "cooperative");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.request_timeout(), Duration::from_millis(500));
    }
}
