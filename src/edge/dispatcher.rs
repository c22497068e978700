//! Dispatcher
//!
//! Owns the edge's well-known address. Local data requests are sharded to
//! workers by key hash, so requests for one key are served in order; every
//! other request kind goes to its processor. Responses never arrive here.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use super::EdgeNode;
use crate::cooperation::worker_idx;
use crate::error::{Error, Result};
use crate::network::{CacheServerItem, Mailbox, Message, MessageKind};

/// Channels into the edge's tasks
pub struct Routes {
    pub workers: Vec<mpsc::Sender<CacheServerItem>>,
    pub redirection: mpsc::Sender<CacheServerItem>,
    pub placement: mpsc::Sender<CacheServerItem>,
    pub victim_fetch: mpsc::Sender<CacheServerItem>,
    pub metadata_update: mpsc::Sender<CacheServerItem>,
    pub invalidation: mpsc::Sender<CacheServerItem>,
    pub beacon: mpsc::Sender<CacheServerItem>,
}

pub struct Dispatcher {
    edge: Arc<EdgeNode>,
    mailbox: Mailbox,
    routes: Routes,
}

impl Dispatcher {
    pub fn new(edge: Arc<EdgeNode>, mailbox: Mailbox, routes: Routes) -> Self {
        Self {
            edge,
            mailbox,
            routes,
        }
    }

    /// Route messages until the edge stops; dropping the routes then lets
    /// every worker and processor drain and exit
    #[instrument(skip(self), fields(edge = self.edge.edge_idx()))]
    pub async fn run(mut self) {
        info!(
            "Starting dispatcher at {} with {} workers",
            self.mailbox.addr(),
            self.routes.workers.len()
        );
        let poll_interval = self.edge.config().poll_interval();

        while self.edge.is_running() {
            let Some(message) = self.mailbox.recv(poll_interval).await else {
                continue;
            };
            if let Err(e) = self.route(message).await {
                warn!("Dispatcher of edge {} failed to route: {}", self.edge.edge_idx(), e);
            }
        }

        info!("Dispatcher of edge {} stopped", self.edge.edge_idx());
    }

    fn route_for(&self, message: &Message) -> Option<&mpsc::Sender<CacheServerItem>> {
        let route = match message.kind() {
            MessageKind::LocalGetRequest
            | MessageKind::LocalPutRequest
            | MessageKind::LocalDelRequest => {
                let key = message.payload.data_request_key()?;
                &self.routes.workers[worker_idx(key, self.routes.workers.len())]
            }
            MessageKind::RedirectedGetRequest => &self.routes.redirection,
            MessageKind::PlacementNotifyRequest => &self.routes.placement,
            MessageKind::VictimFetchRequest => &self.routes.victim_fetch,
            MessageKind::MetadataUpdateRequest => &self.routes.metadata_update,
            MessageKind::InvalidationRequest => &self.routes.invalidation,
            MessageKind::DirectoryLookupRequest
            | MessageKind::DirectoryUpdateRequest
            | MessageKind::AcquireWritelockRequest
            | MessageKind::ReleaseWritelockRequest => &self.routes.beacon,
            _ => return None,
        };
        Some(route)
    }

    async fn route(&self, message: Message) -> Result<()> {
        let Some(route) = self.route_for(&message) else {
            self.edge.stats().record_unmatched_response();
            warn!(
                "Edge {} dispatcher dropping {:?} from {}",
                self.edge.edge_idx(),
                message.kind(),
                message.source
            );
            return Ok(());
        };
        let kind = message.kind();
        route
            .send(CacheServerItem::new(message))
            .await
            .map_err(|_| Error::Internal(format!("queue for {:?} is closed", kind)))
    }
}
