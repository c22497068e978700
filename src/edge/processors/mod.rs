//! Edge Processors
//!
//! Single-purpose tasks fed by the dispatcher. Each drains its bounded
//! channel until the dispatcher drops the sender. A fatal error stops the
//! whole edge; anything else is logged and the loop continues.

mod beacon;
mod invalidation;
mod metadata_update;
mod placement;
mod redirection;
mod victim_fetch;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use beacon::BeaconProcessor;
pub use invalidation::InvalidationProcessor;
pub use metadata_update::MetadataUpdateProcessor;
pub use placement::PlacementProcessor;
pub use redirection::RedirectionProcessor;
pub use victim_fetch::VictimFetchProcessor;

use super::EdgeNode;
use crate::error::Result;
use crate::network::{CacheServerItem, Message, Payload};

/// A task consuming [`CacheServerItem`]s for one edge
#[async_trait]
pub trait Processor: Send + 'static {
    /// Name used in logs
    const NAME: &'static str;

    fn edge(&self) -> &Arc<EdgeNode>;

    async fn handle(&mut self, item: CacheServerItem) -> Result<()>;
}

/// Drive `processor` until its channel closes or it hits a fatal error
pub async fn run_processor<P: Processor>(
    mut processor: P,
    mut rx: mpsc::Receiver<CacheServerItem>,
) {
    let edge_idx = processor.edge().edge_idx();
    debug!("Edge {} {} started", edge_idx, P::NAME);

    while let Some(item) = rx.recv().await {
        let kind = item.message.kind();
        if let Err(e) = processor.handle(item).await {
            if e.is_fatal() {
                processor.edge().fail(e);
                break;
            }
            warn!(
                "Edge {} {} failed on {:?}: {}",
                edge_idx,
                P::NAME,
                kind,
                e
            );
        }
    }

    debug!("Edge {} {} stopped", edge_idx, P::NAME);
}

/// Send `payload` back to whoever sent `request`
pub(crate) async fn reply(edge: &EdgeNode, item: &CacheServerItem, payload: Payload) -> Result<()> {
    let response: Message = item.message.reply(edge.addr(), payload);
    edge.transport().send(item.source, response).await
}
