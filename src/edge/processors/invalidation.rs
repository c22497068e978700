//! Marks local copies stale on behalf of a beacon serving a writer

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{reply, Processor};
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::Result;
use crate::network::{CacheServerItem, Payload};

pub struct InvalidationProcessor {
    edge: Arc<EdgeNode>,
}

impl InvalidationProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Self {
        Self { edge }
    }
}

#[async_trait]
impl Processor for InvalidationProcessor {
    const NAME: &'static str = "invalidation processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let Payload::InvalidationRequest { key } = &item.message.payload else {
            return Err(unexpected("InvalidationRequest", &item.message.payload));
        };
        if self.edge.cache().invalidate(key) {
            self.edge.stats().record_invalidation();
            debug!("Edge {} invalidated {}", self.edge.edge_idx(), key);
        }
        let payload = Payload::InvalidationResponse { key: key.clone() };
        reply(&self.edge, &item, payload).await
    }
}
