//! Serves neighbors' redirected GETs from the local cache

use std::sync::Arc;

use async_trait::async_trait;

use super::{reply, Processor};
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::Result;
use crate::network::{CacheServerItem, Payload};

pub struct RedirectionProcessor {
    edge: Arc<EdgeNode>,
}

impl RedirectionProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Self {
        Self { edge }
    }
}

#[async_trait]
impl Processor for RedirectionProcessor {
    const NAME: &'static str = "redirection processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let Payload::RedirectedGetRequest { key, .. } = &item.message.payload else {
            return Err(unexpected("RedirectedGetRequest", &item.message.payload));
        };
        self.edge.merge_inbound(&item.message.payload);

        let local = self.edge.cache().get(key, true);
        let requester = item.source.edge_idx().unwrap_or(self.edge.edge_idx());
        let payload = Payload::RedirectedGetResponse {
            key: key.clone(),
            value: local.value,
            is_cached: local.is_cached,
            is_valid: local.is_valid,
            syncset: self.edge.outbound_syncset(requester),
        };
        reply(&self.edge, &item, payload).await
    }
}
