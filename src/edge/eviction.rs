//! Eviction for capacity
//!
//! Victims are chosen under the edge-wide eviction lock, then removed from
//! their beacons' directories in parallel: one coalesced update request per
//! remote beacon, driven to completion by the round-trip ack map.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use super::coordination::unexpected;
use super::EdgeNode;
use crate::cache::key_value::Key;
use crate::cooperation::DirectoryOp;
use crate::error::Result;
use crate::metrics;
use crate::network::{DirectoryUpdate, Mailbox, NodeAddr, Payload};

impl EdgeNode {
    /// Evict until the local cache fits its capacity again
    ///
    /// Returns the number of evicted objects.
    #[instrument(skip(self, mailbox), fields(edge = self.edge_idx()))]
    pub(crate) async fn evict_for_capacity(
        &self,
        mailbox: &mut Mailbox,
        is_background: bool,
    ) -> Result<usize> {
        if !self.cache().is_over_capacity() {
            return Ok(0);
        }

        let victims = {
            let _guard = self.eviction_lock.lock().await;
            self.cache().evict_for_capacity()?
        };
        if victims.is_empty() {
            return Ok(0);
        }

        let count = victims.len();
        self.stats().record_evictions(count);
        metrics::record_evictions(self.edge_idx(), count);
        debug!(
            "Edge {} evicted {} objects, {} / {} bytes used",
            self.edge_idx(),
            count,
            self.cache().used_bytes(),
            self.cache().capacity_bytes()
        );

        let keys = victims.into_iter().map(|(key, _)| key).collect();
        self.evict_directories(mailbox, keys, is_background).await?;
        Ok(count)
    }

    /// Remove this edge from the directory entries of `keys`
    ///
    /// Keys this edge is beacon of are updated in place; the others are
    /// grouped by beacon into one request each, sent in parallel.
    pub async fn evict_directories(
        &self,
        mailbox: &mut Mailbox,
        keys: Vec<Key>,
        is_background: bool,
    ) -> Result<()> {
        let mut by_beacon: BTreeMap<u32, Vec<Key>> = BTreeMap::new();
        for key in keys {
            by_beacon
                .entry(self.cooperation().beacon_of(&key))
                .or_default()
                .push(key);
        }

        if let Some(local) = by_beacon.remove(&self.edge_idx()) {
            for key in local {
                self.apply_directory_update(&key, self.edge_idx(), DirectoryOp::Evict)
                    .await?;
            }
        }
        if by_beacon.is_empty() {
            return Ok(());
        }

        let requests: Vec<(NodeAddr, Payload)> = by_beacon
            .into_iter()
            .map(|(beacon, keys)| {
                self.stats().record_directory_evict_request();
                let updates = keys
                    .into_iter()
                    .map(|key| DirectoryUpdate {
                        key,
                        op: DirectoryOp::Evict,
                    })
                    .collect();
                (
                    NodeAddr::edge(beacon),
                    Payload::DirectoryUpdateRequest {
                        updates,
                        syncset: self.outbound_syncset(beacon),
                    },
                )
            })
            .collect();

        let Some(responses) = self.fan_out(mailbox, requests, is_background).await? else {
            return Ok(());
        };
        for response in responses {
            if !matches!(response.payload, Payload::DirectoryUpdateResponse { .. }) {
                return Err(unexpected("DirectoryUpdateResponse", &response.payload));
            }
        }
        Ok(())
    }
}
