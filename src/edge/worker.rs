//! Cache Server Worker
//!
//! Serves client GET/PUT/DEL for the keys sharded to it.
//!
//! ```text
//!  GET: local valid? ── yes ──▶ LocalHit
//!         │ no
//!         ▼
//!       directory lookup ── being written ──▶ cloud ──▶ CooperativeInvalid
//!         │ target edge
//!         ▼
//!       redirected get ── valid ──▶ CooperativeHit
//!         │ invalid ──▶ cloud ──▶ CooperativeInvalid
//!         │ gone / no target ──▶ cloud ──▶ GlobalMiss ──▶ admit (+ placement)
//!
//!  PUT/DEL: write lock ──▶ cloud ──▶ local update ──▶ release ──▶ GlobalMiss
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::coordination::unexpected;
use super::processors::Processor;
use super::EdgeNode;
use crate::cache::key_value::{Hitflag, Key, Value};
use crate::error::{Error, Result};
use crate::metrics;
use crate::network::{CacheServerItem, Mailbox, NodeAddr, NodeId, Payload};

/// Served value and where it came from
type Served = (Option<Value>, Hitflag);

pub struct CacheServerWorker {
    edge: Arc<EdgeNode>,
    worker_idx: usize,
    mailbox: Mailbox,
}

impl CacheServerWorker {
    pub fn new(edge: Arc<EdgeNode>, worker_idx: usize) -> Result<Self> {
        let mailbox = edge
            .transport()
            .open_mailbox(NodeId::Edge(edge.edge_idx()))?;
        Ok(Self {
            edge,
            worker_idx,
            mailbox,
        })
    }

    // =========================================================================
    // GET
    // =========================================================================

    #[instrument(skip(self), fields(edge = self.edge.edge_idx(), worker = self.worker_idx))]
    async fn process_get(&mut self, key: &Key) -> Result<Option<Served>> {
        let local = self.edge.cache().get(key, false);
        if let Some(value) = local.value {
            return Ok(Some((visible(value), Hitflag::LocalHit)));
        }

        let Some(lookup) = self.edge.lookup_directory(&mut self.mailbox, key).await? else {
            return Ok(None);
        };

        let mut hitflag = Hitflag::GlobalMiss;
        let mut fetched = None;
        if lookup.being_written {
            hitflag = Hitflag::CooperativeInvalid;
        } else if let Some(target) = lookup.target_edge_idx {
            let payload = Payload::RedirectedGetRequest {
                key: key.clone(),
                syncset: self.edge.outbound_syncset(target),
            };
            let Some(response) = self
                .edge
                .round_trip(&mut self.mailbox, NodeAddr::edge(target), payload, false)
                .await?
            else {
                return Ok(None);
            };
            match response.payload {
                Payload::RedirectedGetResponse {
                    value,
                    is_cached,
                    is_valid,
                    ..
                } => {
                    if is_cached && is_valid && value.is_some() {
                        hitflag = Hitflag::CooperativeHit;
                        fetched = value;
                    } else if is_cached {
                        hitflag = Hitflag::CooperativeInvalid;
                    } else {
                        debug!("Directory pointed at edge {} which no longer caches {}", target, key);
                    }
                }
                other => return Err(unexpected("RedirectedGetResponse", &other)),
            }
        }

        let value = match fetched {
            Some(value) => value,
            None => self.edge.cloud().get(key).await?,
        };

        // A write is in flight; leave local state to the writer
        if lookup.being_written {
            return Ok(Some((visible(value), hitflag)));
        }

        if local.is_cached {
            if self
                .edge
                .refresh_invalid_copy(&mut self.mailbox, key, value)
                .await?
                .is_none()
            {
                return Ok(None);
            }
        } else if hitflag != Hitflag::CooperativeHit && !value.is_deleted() {
            let Some(admitted) = self
                .edge
                .admit_with_directory(&mut self.mailbox, key.clone(), value, false)
                .await?
            else {
                return Ok(None);
            };
            if admitted && !self.edge.cache().need_independent_admit(key) {
                self.edge.spawn_placement(key.clone(), value);
            }
        }

        Ok(Some((visible(value), hitflag)))
    }

    // =========================================================================
    // PUT / DEL
    // =========================================================================

    /// `value == None` deletes
    #[instrument(skip(self), fields(edge = self.edge.edge_idx(), worker = self.worker_idx))]
    async fn process_write(&mut self, key: &Key, value: Option<Value>) -> Result<Option<Served>> {
        if self
            .edge
            .acquire_write_lock(&mut self.mailbox, key)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        let written = match value {
            Some(value) => self.edge.cloud().put(key, value).await,
            None => self.edge.cloud().delete(key).await,
        };
        if written.is_ok() && self.edge.cache().exists(key) {
            let outcome = match value {
                Some(value) => self.edge.cache().update(key, value),
                None => self.edge.cache().remove(key),
            };
            if !outcome.is_successful() {
                // Keep serving nothing rather than the old value
                self.edge.cache().invalidate(key);
            }
        }

        let released = self.edge.release_write_lock(&mut self.mailbox, key).await?;
        written.map_err(|e| Error::Cloud(format!("write of {} failed: {}", key, e)))?;
        if released.is_none() {
            return Ok(None);
        }
        self.edge.stats().record_write();

        if value.is_some() {
            self.edge.evict_for_capacity(&mut self.mailbox, false).await?;
        }
        Ok(Some((None, Hitflag::GlobalMiss)))
    }
}

/// Tombstones are reported as absent
fn visible(value: Value) -> Option<Value> {
    (!value.is_deleted()).then_some(value)
}

#[async_trait]
impl Processor for CacheServerWorker {
    const NAME: &'static str = "worker";

    fn edge(&self) -> &Arc<EdgeNode> {
        &self.edge
    }

    async fn handle(&mut self, item: CacheServerItem) -> Result<()> {
        let (key, served) = match &item.message.payload {
            Payload::LocalGetRequest { key } => (key, self.process_get(key).await?),
            Payload::LocalPutRequest { key, value } => {
                (key, self.process_write(key, Some(*value)).await?)
            }
            Payload::LocalDelRequest { key } => (key, self.process_write(key, None).await?),
            other => return Err(unexpected("local request", other)),
        };
        // Edge stopped midway; the client times out
        let Some((value, hitflag)) = served else {
            return Ok(());
        };

        if matches!(item.message.payload, Payload::LocalGetRequest { .. }) {
            self.edge.stats().record_hitflag(hitflag);
        }
        metrics::record_request(self.edge.edge_idx(), hitflag);
        let payload = Payload::LocalResponse {
            key: key.clone(),
            value,
            hitflag,
            edge_idx: self.edge.edge_idx(),
            used_bytes: self.edge.cache().used_bytes(),
            capacity_bytes: self.edge.cache().capacity_bytes(),
        };
        super::processors::reply(&self.edge, &item, payload).await
    }
}
