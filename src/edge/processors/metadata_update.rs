//! Applies sole-copy transitions pushed by beacons

use std::sync::Arc;

use async_trait::async_trait;

use super::Processor;
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::Result;
use crate::network::{CacheServerItem, Payload};

pub struct MetadataUpdateProcessor {
    edge: Arc<EdgeNode>,
}

impl MetadataUpdateProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Self {
        Self { edge }
    }
}

#[async_trait]
impl Processor for MetadataUpdateProcessor {
    const NAME: &'static str = "metadata update processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    // No response: the beacon does not wait for these
    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let Payload::MetadataUpdateRequest {
            key,
            is_neighbor_cached,
        } = &item.message.payload
        else {
            return Err(unexpected("MetadataUpdateRequest", &item.message.payload));
        };
        self.edge
            .cache()
            .set_neighbor_cached(key, *is_neighbor_cached);
        Ok(())
    }
}
