//! Answers explicit victim fetches with an uncompressed syncset
//!
//! A neighbor with no view of this edge asks before placing an object here.
//! The reply lists victims until their combined charge covers the requested
//! bytes, and never fewer than the usual synced count.

use std::sync::Arc;

use async_trait::async_trait;

use super::{reply, Processor};
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::Result;
use crate::network::{CacheServerItem, Payload};

/// Upper bound on victims scanned for one fetch
const MAX_FETCHED_VICTIMS: usize = 1024;

pub struct VictimFetchProcessor {
    edge: Arc<EdgeNode>,
}

impl VictimFetchProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Self {
        Self { edge }
    }
}

#[async_trait]
impl Processor for VictimFetchProcessor {
    const NAME: &'static str = "victim fetch processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let Payload::VictimFetchRequest { required_bytes, .. } = &item.message.payload else {
            return Err(unexpected("VictimFetchRequest", &item.message.payload));
        };
        self.edge.merge_inbound(&item.message.payload);

        let margin = self.edge.cache().cache_margin_bytes();
        let minimum = self.edge.config().synced_victim_count;
        let mut covered = margin;
        let mut victims = Vec::new();
        for victim in self.edge.cache().victim_cacheinfos(MAX_FETCHED_VICTIMS) {
            if victims.len() >= minimum && covered >= *required_bytes {
                break;
            }
            covered += victim.key.len() as u64 + victim.object_size as u64;
            victims.push(victim);
        }

        let requester = item.source.edge_idx().unwrap_or(self.edge.edge_idx());
        let syncset = self
            .edge
            .cooperation()
            .build_complete_syncset(requester, margin, victims);
        reply(&self.edge, &item, Payload::VictimFetchResponse { syncset }).await
    }
}
