//! Placement
//!
//! Under the cooperative policy an edge that fetched an object from the
//! cloud may also push it to neighbors with room for it. The sender side
//! runs on a detached task so the client response never waits on it; the
//! receiver side admits as background traffic, and background admissions
//! never compute placement again, so placement does not chain.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{reply, Processor};
use crate::cache::key_value::{Key, Value};
use crate::cache::policy::object_charge;
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::Result;
use crate::metrics;
use crate::network::{CacheServerItem, Mailbox, NodeAddr, NodeId, Payload};

// =============================================================================
// Receiver
// =============================================================================

pub struct PlacementProcessor {
    edge: Arc<EdgeNode>,
    mailbox: Mailbox,
}

impl PlacementProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Result<Self> {
        let mailbox = edge
            .transport()
            .open_mailbox(NodeId::Edge(edge.edge_idx()))?;
        Ok(Self { edge, mailbox })
    }
}

#[async_trait]
impl Processor for PlacementProcessor {
    const NAME: &'static str = "placement processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let Payload::PlacementNotifyRequest { key, value, .. } = &item.message.payload else {
            return Err(unexpected("PlacementNotifyRequest", &item.message.payload));
        };
        self.edge.merge_inbound(&item.message.payload);

        let admitted = if self.edge.cache().exists(key) {
            false
        } else {
            match self
                .edge
                .admit_with_directory(&mut self.mailbox, key.clone(), *value, true)
                .await?
            {
                Some(admitted) => admitted,
                None => return Ok(()),
            }
        };
        if admitted {
            self.edge.stats().record_placement_admitted();
        }
        debug!(
            "Edge {} placement of {}: admitted {}",
            self.edge.edge_idx(),
            key,
            admitted
        );

        let requester = item.source.edge_idx().unwrap_or(self.edge.edge_idx());
        let payload = Payload::PlacementNotifyResponse {
            key: key.clone(),
            admitted,
            syncset: self.edge.outbound_syncset(requester),
        };
        reply(&self.edge, &item, payload).await
    }
}

// =============================================================================
// Sender
// =============================================================================

/// Reward a freshly admitted object is expected to earn: one local access
/// spread over its charge
fn fresh_object_reward(edge: &EdgeNode, charge: u64) -> f64 {
    edge.config().policy_config.local_hit_weight / charge.max(1) as f64
}

impl EdgeNode {
    /// Push a cloud-fetched object to neighbors that can take it, without
    /// blocking the caller
    pub(crate) fn spawn_placement(self: &Arc<Self>, key: Key, value: Value) {
        let charge = object_charge(&key, &value);
        let reward = fresh_object_reward(self, charge);
        let candidates = self.cooperation().placement_candidates(charge, reward);
        if candidates.is_empty() {
            return;
        }

        let edge = Arc::clone(self);
        self.spawn_background("placement", async move {
            edge.place_on_neighbors(key, value, charge, reward, candidates).await
        });
    }

    #[instrument(skip(self, value, reward), fields(edge = self.edge_idx()))]
    async fn place_on_neighbors(
        &self,
        key: Key,
        value: Value,
        charge: u64,
        reward: f64,
        candidates: Vec<u32>,
    ) -> Result<()> {
        let mut mailbox = self
            .transport()
            .open_mailbox(NodeId::Edge(self.edge_idx()))?;

        for target in candidates {
            if !self.cooperation().has_victim_view(target) {
                self.stats().record_victim_fetch();
                let payload = Payload::VictimFetchRequest {
                    required_bytes: charge,
                    syncset: self.outbound_syncset(target),
                };
                if self
                    .round_trip(&mut mailbox, NodeAddr::edge(target), payload, true)
                    .await?
                    .is_none()
                {
                    return Ok(());
                }
            }
            if !self.cooperation().can_absorb(target, charge, reward) {
                debug!("Edge {} skips placing {} at {}", self.edge_idx(), key, target);
                continue;
            }

            self.stats().record_placement_sent();
            metrics::record_placement(self.edge_idx());
            let payload = Payload::PlacementNotifyRequest {
                key: key.clone(),
                value,
                syncset: self.outbound_syncset(target),
            };
            let Some(response) = self
                .round_trip(&mut mailbox, NodeAddr::edge(target), payload, true)
                .await?
            else {
                return Ok(());
            };
            match response.payload {
                Payload::PlacementNotifyResponse { admitted, .. } => {
                    debug!(
                        "Edge {} placed {} at {}: {}",
                        self.edge_idx(),
                        key,
                        target,
                        admitted
                    );
                }
                other => return Err(unexpected("PlacementNotifyResponse", &other)),
            }
        }
        Ok(())
    }
}
