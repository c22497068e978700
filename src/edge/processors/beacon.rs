//! Directory service for the keys this edge is beacon of
//!
//! Lookups, updates and lock releases are answered inline. A lock
//! acquisition has to invalidate every other copy first, so it runs on its
//! own task and mailbox to keep the directory responsive meanwhile.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{reply, Processor};
use crate::edge::coordination::unexpected;
use crate::edge::EdgeNode;
use crate::error::{Error, Result};
use crate::network::{CacheServerItem, DirectoryUpdateResult, NodeId, Payload};

pub struct BeaconProcessor {
    edge: Arc<EdgeNode>,
}

impl BeaconProcessor {
    pub fn new(edge: Arc<EdgeNode>) -> Self {
        Self { edge }
    }

    fn requester(&self, item: &CacheServerItem) -> Result<u32> {
        item.source.edge_idx().ok_or_else(|| {
            Error::invariant(format!(
                "directory request {:?} from non-edge {}",
                item.message.kind(),
                item.source
            ))
        })
    }

    #[instrument(skip(edge, item), fields(edge = edge.edge_idx()))]
    async fn acquire_for(edge: Arc<EdgeNode>, item: CacheServerItem, writer: u32) -> Result<()> {
        let Payload::AcquireWritelockRequest { key } = &item.message.payload else {
            return Err(unexpected("AcquireWritelockRequest", &item.message.payload));
        };
        let grant = edge.cooperation().acquire_write_lock_local(key, writer)?;
        if grant.acquired {
            let mut mailbox = edge
                .transport()
                .open_mailbox(NodeId::Edge(edge.edge_idx()))?;
            if edge
                .invalidate_copies(&mut mailbox, key, grant.invalidate_edges)
                .await?
                .is_none()
            {
                return Ok(());
            }
        }
        debug!(
            "Beacon {} write lock on {} for edge {}: {}",
            edge.edge_idx(),
            key,
            writer,
            grant.acquired
        );
        let payload = Payload::AcquireWritelockResponse {
            key: key.clone(),
            acquired: grant.acquired,
        };
        reply(&edge, &item, payload).await
    }
}

#[async_trait]
impl Processor for BeaconProcessor {
    const NAME: &'static str = "beacon processor";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let requester = self.requester(&item)?;
        self.edge.merge_inbound(&item.message.payload);

        if let Payload::AcquireWritelockRequest { .. } = item.message.payload {
            let edge = Arc::clone(&self.edge);
            self.edge
                .spawn_background("write lock", Self::acquire_for(edge, item, requester));
            return Ok(());
        }

        let payload = match &item.message.payload {
            Payload::DirectoryLookupRequest { key } => {
                let lookup = self.edge.cooperation().lookup_local(key, requester)?;
                Payload::DirectoryLookupResponse {
                    key: key.clone(),
                    lookup,
                    syncset: self.edge.outbound_syncset(requester),
                }
            }
            Payload::DirectoryUpdateRequest { updates, .. } => {
                let mut results = Vec::with_capacity(updates.len());
                for update in updates {
                    let outcome = self
                        .edge
                        .apply_directory_update(&update.key, requester, update.op)
                        .await?;
                    results.push(DirectoryUpdateResult {
                        key: update.key.clone(),
                        outcome,
                    });
                }
                Payload::DirectoryUpdateResponse {
                    results,
                    syncset: self.edge.outbound_syncset(requester),
                }
            }
            Payload::ReleaseWritelockRequest { key } => {
                self.edge
                    .cooperation()
                    .release_write_lock_local(key, requester)?;
                Payload::ReleaseWritelockResponse { key: key.clone() }
            }
            other => return Err(unexpected("directory request", other)),
        };
        reply(&self.edge, &item, payload).await
    }
}
