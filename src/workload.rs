//! Synthetic Workload
//!
//! Drives a cluster with a reproducible request stream: keys skewed towards
//! the low end of the keyspace, a configurable share of writes, and requests
//! spread round-robin over edges by several concurrent clients.

use std::collections::BTreeMap;
use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::key_value::{fx_hash, Hitflag, Value};
use crate::cluster::{Client, Cluster};
use crate::error::{Error, Result};

/// Workload shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub request_count: u64,
    pub keyspace: u64,
    /// Size of written values
    pub object_size: u32,
    /// Percentage of requests that are PUTs
    pub write_percent: u8,
    /// Concurrent clients
    pub clients: usize,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            request_count: 10_000,
            keyspace: 1_000,
            object_size: 1024,
            write_percent: 5,
            clients: 8,
            seed: 0,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<()> {
        if self.keyspace == 0 || self.clients == 0 {
            return Err(Error::Config(
                "keyspace and clients must be positive".to_string(),
            ));
        }
        if self.write_percent > 100 {
            return Err(Error::Config("write_percent is at most 100".to_string()));
        }
        Ok(())
    }
}

/// One generated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub key_idx: u64,
    pub is_write: bool,
}

/// Request `seq` of the stream; pure in (`config`, `seq`)
pub fn request_at(config: &WorkloadConfig, seq: u64) -> Request {
    let draw = |salt: u64| {
        let mut buf = [0u8; 24];
        buf[..8].copy_from_slice(&config.seed.to_le_bytes());
        buf[8..16].copy_from_slice(&seq.to_le_bytes());
        buf[16..].copy_from_slice(&salt.to_le_bytes());
        fx_hash(&buf)
    };
    // Minimum of two uniform draws favours low key indices
    let key_idx = (draw(1) % config.keyspace).min(draw(2) % config.keyspace);
    let is_write = draw(3) % 100 < config.write_percent as u64;
    Request { key_idx, is_write }
}

pub fn key_name(key_idx: u64) -> String {
    format!("key-{:08}", key_idx)
}

/// Outcome counts of a workload run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkloadReport {
    pub requests: u64,
    pub writes: u64,
    pub errors: u64,
    pub hitflags: BTreeMap<String, u64>,
    pub elapsed_ms: u128,
}

impl WorkloadReport {
    pub fn count(&self, hitflag: Hitflag) -> u64 {
        self.hitflags.get(hitflag.as_str()).copied().unwrap_or(0)
    }

    fn merge(&mut self, other: WorkloadReport) {
        self.requests += other.requests;
        self.writes += other.writes;
        self.errors += other.errors;
        for (flag, count) in other.hitflags {
            *self.hitflags.entry(flag).or_insert(0) += count;
        }
    }
}

/// Run the workload to completion
pub async fn run(cluster: &Cluster, config: &WorkloadConfig) -> Result<WorkloadReport> {
    config.validate()?;
    info!("Starting workload with {:?}", config);
    let started = Instant::now();

    let mut clients = Vec::with_capacity(config.clients);
    for client_idx in 0..config.clients {
        clients.push(drive_client(
            cluster.client()?,
            config,
            client_idx as u64,
            cluster.edgecnt(),
        ));
    }

    let mut report = WorkloadReport::default();
    for partial in join_all(clients).await {
        report.merge(partial);
    }
    report.elapsed_ms = started.elapsed().as_millis();
    info!(
        "Workload finished: {} requests, {} errors in {} ms",
        report.requests, report.errors, report.elapsed_ms
    );
    Ok(report)
}

async fn drive_client(
    mut client: Client,
    config: &WorkloadConfig,
    client_idx: u64,
    edgecnt: u32,
) -> WorkloadReport {
    let mut report = WorkloadReport::default();
    let stride = config.clients as u64;

    let mut seq = client_idx;
    while seq < config.request_count {
        let request = request_at(config, seq);
        let edge_idx = (seq % edgecnt as u64) as u32;
        let key = key_name(request.key_idx);

        let result = if request.is_write {
            client
                .put(edge_idx, key.as_str(), Value::new(config.object_size))
                .await
        } else {
            client.get(edge_idx, key.as_str()).await
        };
        report.requests += 1;
        match result {
            Ok(response) if request.is_write => {
                report.writes += 1;
                debug!("PUT {} at edge {} done", key, response.edge_idx);
            }
            Ok(response) => {
                *report
                    .hitflags
                    .entry(response.hitflag.as_str().to_string())
                    .or_insert(0) += 1;
            }
            Err(e) => {
                report.errors += 1;
                warn!("Request {} for {} failed: {}", seq, key, e);
            }
        }
        seq += stride;
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_is_reproducible() {
        let config = WorkloadConfig::default();
        for seq in 0..100 {
            assert_eq!(request_at(&config, seq), request_at(&config, seq));
            assert!(request_at(&config, seq).key_idx < config.keyspace);
        }
        let other = WorkloadConfig {
            seed: 7,
            ..Default::default()
        };
        let differs = (0..100).any(|s| request_at(&config, s) != request_at(&other, s));
        assert!(differs);
    }

    #[test]
    fn test_stream_is_skewed_and_mixed() {
        let config = WorkloadConfig {
            keyspace: 100,
            write_percent: 20,
            ..Default::default()
        };
        let requests: Vec<_> = (0..10_000).map(|s| request_at(&config, s)).collect();
        let low = requests.iter().filter(|r| r.key_idx < 50).count();
        assert!(low > 6_000, "low half drew {}", low);

        let writes = requests.iter().filter(|r| r.is_write).count();
        assert!((1_000..3_000).contains(&writes), "writes {}", writes);
    }

    #[test]
    fn test_validate() {
        assert!(WorkloadConfig::default().validate().is_ok());
        let config = WorkloadConfig {
            write_percent: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
