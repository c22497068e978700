//! Edge Node
//!
//! One cooperative cache edge: a dispatcher fanning requests out to workers
//! and processors, all sharing the edge's local cache and cooperation state.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────────────────────┐
//!   network ─────▶│ Dispatcher (port 0)                           │
//!                 │   local get/put/del ── hash(key) % workers ──▶│ Worker x N
//!                 │   redirected get ────────────────────────────▶│ Redirection
//!                 │   placement notify ──────────────────────────▶│ Placement
//!                 │   victim fetch ──────────────────────────────▶│ VictimFetch
//!                 │   metadata update ───────────────────────────▶│ MetadataUpdate
//!                 │   invalidation ──────────────────────────────▶│ Invalidation
//!                 │   directory / write lock ────────────────────▶│ Beacon
//!                 └───────────────────────────────────────────────┘
//!                        all tasks share Arc<EdgeNode>:
//!                 LocalCache │ CooperationWrapper │ EdgeStats
//! ```
//!
//! Every task that issues requests owns a reply mailbox; responses never go
//! through the dispatcher.

mod config;
mod coordination;
mod dispatcher;
mod eviction;
mod processors;
mod rpc;
mod stats;
mod worker;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

pub use config::EdgeConfig;
pub use stats::{EdgeStats, EdgeStatsSnapshot};

use crate::cache::local_cache::LocalCache;
use crate::cloud::CloudBackend;
use crate::cooperation::CooperationWrapper;
use crate::error::{Error, Result};
use crate::network::{NodeAddr, Payload, Transport};
use crate::victim::VictimSyncset;

use dispatcher::{Dispatcher, Routes};
use processors::{
    run_processor, BeaconProcessor, InvalidationProcessor, MetadataUpdateProcessor,
    PlacementProcessor, RedirectionProcessor, VictimFetchProcessor,
};
use worker::CacheServerWorker;

/// Shared state of one edge
pub struct EdgeNode {
    config: EdgeConfig,
    cache: LocalCache,
    cooperation: CooperationWrapper,
    transport: Arc<dyn Transport>,
    cloud: Arc<dyn CloudBackend>,
    stats: EdgeStats,
    /// Serializes victim selection so concurrent evictions do not race
    eviction_lock: tokio::sync::Mutex<()>,
    /// Victim syncsets flow only under the cooperative policy
    syncs_victims: bool,
    is_running: AtomicBool,
    fatal_error: Mutex<Option<Error>>,
    /// Short-lived tasks spawned off the request path, joined at shutdown
    background: Mutex<JoinSet<()>>,
}

impl EdgeNode {
    pub fn new(
        config: EdgeConfig,
        transport: Arc<dyn Transport>,
        cloud: Arc<dyn CloudBackend>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let cache = LocalCache::new(
            config.edge_idx,
            &config.policy,
            config.capacity_bytes,
            &config.policy_config,
        )?;
        let cooperation =
            CooperationWrapper::new(config.edge_idx, config.edgecnt, config.placement_top_k);
        let syncs_victims = cache.policy_name() == "cooperative";

        Ok(Arc::new(Self {
            config,
            cache,
            cooperation,
            transport,
            cloud,
            stats: EdgeStats::default(),
            eviction_lock: tokio::sync::Mutex::new(()),
            syncs_victims,
            is_running: AtomicBool::new(false),
            fatal_error: Mutex::new(None),
            background: Mutex::new(JoinSet::new()),
        }))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn edge_idx(&self) -> u32 {
        self.config.edge_idx
    }

    pub fn addr(&self) -> NodeAddr {
        NodeAddr::edge(self.config.edge_idx)
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn cooperation(&self) -> &CooperationWrapper {
        &self.cooperation
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn cloud(&self) -> &Arc<dyn CloudBackend> {
        &self.cloud
    }

    pub fn stats(&self) -> &EdgeStats {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> EdgeStatsSnapshot {
        self.stats.snapshot(self.edge_idx(), self.cache.stats())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Ask every task of this edge to wind down
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// Record a fatal error and stop the edge
    pub(crate) fn fail(&self, err: Error) {
        error!("Edge {} stopping on fatal error: {}", self.edge_idx(), err);
        let mut slot = self.fatal_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
        self.stop();
    }

    /// First fatal error this edge hit, if any
    pub fn take_fatal_error(&self) -> Option<Error> {
        self.fatal_error.lock().take()
    }

    /// Run `task` off the request path; a fatal error stops the edge
    pub(crate) fn spawn_background<F>(self: &Arc<Self>, what: &'static str, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let edge = Arc::clone(self);
        let mut background = self.background.lock();
        while background.try_join_next().is_some() {}
        background.spawn(async move {
            if let Err(e) = task.await {
                if e.is_fatal() {
                    edge.fail(e);
                } else {
                    warn!("Edge {} {} failed: {}", edge.edge_idx(), what, e);
                }
            }
        });
    }

    /// Background tasks spawned and not yet joined
    pub fn background_task_count(&self) -> usize {
        self.background.lock().len()
    }

    /// Spawn the dispatcher, workers and processors
    pub fn start(self: &Arc<Self>) -> Result<EdgeHandle> {
        let dispatcher_mailbox = self.transport.bind(self.addr())?;
        self.is_running.store(true, Ordering::Release);

        let capacity = self.config.queue_capacity;
        let mut tasks = Vec::new();

        let mut workers = Vec::with_capacity(self.config.worker_count);
        for worker_idx in 0..self.config.worker_count {
            let (tx, rx) = mpsc::channel(capacity);
            let worker = CacheServerWorker::new(Arc::clone(self), worker_idx)?;
            tasks.push(tokio::spawn(run_processor(worker, rx)));
            workers.push(tx);
        }

        let (redirection, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            RedirectionProcessor::new(Arc::clone(self)),
            rx,
        )));
        let (placement, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            PlacementProcessor::new(Arc::clone(self))?,
            rx,
        )));
        let (victim_fetch, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            VictimFetchProcessor::new(Arc::clone(self)),
            rx,
        )));
        let (metadata_update, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            MetadataUpdateProcessor::new(Arc::clone(self)),
            rx,
        )));
        let (invalidation, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            InvalidationProcessor::new(Arc::clone(self)),
            rx,
        )));
        let (beacon, rx) = mpsc::channel(capacity);
        tasks.push(tokio::spawn(run_processor(
            BeaconProcessor::new(Arc::clone(self)),
            rx,
        )));

        let dispatcher = Dispatcher::new(
            Arc::clone(self),
            dispatcher_mailbox,
            Routes {
                workers,
                redirection,
                placement,
                victim_fetch,
                metadata_update,
                invalidation,
                beacon,
            },
        );
        tasks.push(tokio::spawn(dispatcher.run()));

        info!(
            "Edge {} started: policy {}, {} bytes, {} workers",
            self.edge_idx(),
            self.cache.policy_name(),
            self.config.capacity_bytes,
            self.config.worker_count
        );
        Ok(EdgeHandle {
            edge: Arc::clone(self),
            tasks,
        })
    }

    // =========================================================================
    // Victim Synchronization
    // =========================================================================

    /// Syncset to piggyback on a message to `dst_edge_idx`
    pub(crate) fn outbound_syncset(&self, dst_edge_idx: u32) -> Option<VictimSyncset> {
        if !self.syncs_victims || dst_edge_idx == self.edge_idx() {
            return None;
        }
        Some(self.cooperation.build_syncset(
            dst_edge_idx,
            self.cache.cache_margin_bytes(),
            self.cache.victim_cacheinfos(self.config.synced_victim_count),
        ))
    }

    /// Merge the syncset piggybacked on an inbound payload
    pub(crate) fn merge_inbound(&self, payload: &Payload) {
        if let Some(syncset) = payload.syncset() {
            self.cooperation.merge_syncset(syncset);
        }
    }
}

/// Running tasks of one edge
pub struct EdgeHandle {
    edge: Arc<EdgeNode>,
    tasks: Vec<JoinHandle<()>>,
}

impl EdgeHandle {
    pub fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    /// Stop the edge and wait for all of its tasks
    ///
    /// Returns the fatal error that stopped the edge, if one did.
    pub async fn shutdown(self) -> Result<()> {
        self.edge.stop();
        for joined in join_all(self.tasks).await {
            joined.map_err(|e| Error::Internal(format!("edge task panicked: {}", e)))?;
        }
        let mut background = std::mem::take(&mut *self.edge.background.lock());
        while let Some(joined) = background.join_next().await {
            joined.map_err(|e| Error::Internal(format!("background task panicked: {}", e)))?;
        }
        info!("Edge {} stopped", self.edge.edge_idx());
        match self.edge.take_fatal_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
