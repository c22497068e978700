//! Directory coordination
//!
//! Edge-side view of the beacon protocol. Each operation runs locally when
//! this edge is the key's beacon and as a round trip otherwise, so callers
//! never branch on beacon ownership themselves.
//!
//! Admission follows the directory state machine:
//!
//! ```text
//!  NOT_CACHED ──admit──▶ PENDING_DIRECTORY_ADMIT ──ack──▶ CACHED_VALID
//!                                                 └─(being written)─▶ CACHED_INVALID
//!  CACHED_* ──evict──▶ PENDING_DIRECTORY_EVICT ──ack──▶ NOT_CACHED
//! ```

use tracing::{debug, warn};

use super::EdgeNode;
use crate::cache::key_value::{Key, Value};
use crate::cooperation::{
    DirectoryLookup, DirectoryOp, DirectoryUpdateOutcome, MetadataUpdateRequirement,
};
use crate::error::{Error, Result};
use crate::network::{DirectoryUpdate, Mailbox, Message, NodeAddr, Payload};

impl EdgeNode {
    // =========================================================================
    // Lookup and Update
    // =========================================================================

    /// Ask the beacon of `key` who caches it
    pub(crate) async fn lookup_directory(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
    ) -> Result<Option<DirectoryLookup>> {
        if self.cooperation().is_beacon(key) {
            return self
                .cooperation()
                .lookup_local(key, self.edge_idx())
                .map(Some);
        }

        let beacon = self.cooperation().beacon_of(key);
        let payload = Payload::DirectoryLookupRequest { key: key.clone() };
        let Some(response) = self
            .round_trip(mailbox, NodeAddr::edge(beacon), payload, false)
            .await?
        else {
            return Ok(None);
        };
        match response.payload {
            Payload::DirectoryLookupResponse { lookup, .. } => Ok(Some(lookup)),
            other => Err(unexpected("DirectoryLookupResponse", &other)),
        }
    }

    /// Report an admission, eviction or refresh of `key` to its beacon
    pub(crate) async fn update_directory(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
        op: DirectoryOp,
        is_background: bool,
    ) -> Result<Option<DirectoryUpdateOutcome>> {
        if self.cooperation().is_beacon(key) {
            return self
                .apply_directory_update(key, self.edge_idx(), op)
                .await
                .map(Some);
        }

        let beacon = self.cooperation().beacon_of(key);
        let payload = Payload::DirectoryUpdateRequest {
            updates: vec![DirectoryUpdate {
                key: key.clone(),
                op,
            }],
            syncset: self.outbound_syncset(beacon),
        };
        let Some(response) = self
            .round_trip(mailbox, NodeAddr::edge(beacon), payload, is_background)
            .await?
        else {
            return Ok(None);
        };
        match response.payload {
            Payload::DirectoryUpdateResponse { results, .. } => results
                .into_iter()
                .find(|r| &r.key == key)
                .map(|r| Some(r.outcome))
                .ok_or_else(|| {
                    Error::invariant(format!("beacon {} did not answer for {}", beacon, key))
                }),
            other => Err(unexpected("DirectoryUpdateResponse", &other)),
        }
    }

    /// Beacon side: apply an update and deliver any sole-copy transition
    pub(crate) async fn apply_directory_update(
        &self,
        key: &Key,
        reporting_edge: u32,
        op: DirectoryOp,
    ) -> Result<DirectoryUpdateOutcome> {
        let outcome = self.cooperation().update_local(key, reporting_edge, op)?;
        self.notify_metadata_update(key, outcome.metadata_update)
            .await;
        Ok(outcome)
    }

    async fn notify_metadata_update(&self, key: &Key, requirement: MetadataUpdateRequirement) {
        let (notify_edge, is_neighbor_cached) = match requirement {
            MetadataUpdateRequirement::None => return,
            MetadataUpdateRequirement::FromSingleToMultiple { notify_edge } => (notify_edge, true),
            MetadataUpdateRequirement::FromMultipleToSingle { notify_edge } => (notify_edge, false),
        };
        self.stats().record_metadata_update();

        if notify_edge == self.edge_idx() {
            self.cache().set_neighbor_cached(key, is_neighbor_cached);
            return;
        }
        let message = Message::request(
            self.addr(),
            Payload::MetadataUpdateRequest {
                key: key.clone(),
                is_neighbor_cached,
            },
            true,
        );
        if let Err(e) = self
            .transport()
            .send(NodeAddr::edge(notify_edge), message)
            .await
        {
            warn!(
                "Beacon {} could not notify edge {} about {}: {}",
                self.edge_idx(),
                notify_edge,
                key,
                e
            );
        }
    }

    // =========================================================================
    // Admission
    // =========================================================================

    /// Admit locally, register with the beacon, then evict for capacity
    ///
    /// The copy starts invalid and becomes valid once the beacon confirms no
    /// write is in flight. Returns whether the key was admitted, or `None`
    /// when the edge stopped midway.
    pub(crate) async fn admit_with_directory(
        &self,
        mailbox: &mut Mailbox,
        key: Key,
        value: Value,
        is_background: bool,
    ) -> Result<Option<bool>> {
        if !self.cache().admit(key.clone(), value, false).is_admitted() {
            return Ok(Some(false));
        }

        let Some(outcome) = self
            .update_directory(mailbox, &key, DirectoryOp::Admit, is_background)
            .await?
        else {
            return Ok(None);
        };

        if !self.cache().exists(&key) {
            // Evicted by a concurrent pass before the beacon heard of it
            debug!("Edge {} lost {} during admission", self.edge_idx(), key);
            if self
                .update_directory(mailbox, &key, DirectoryOp::Evict, is_background)
                .await?
                .is_none()
            {
                return Ok(None);
            }
            return Ok(Some(false));
        }

        if !outcome.being_written {
            self.cache().validate(&key);
        }
        self.cache()
            .set_neighbor_cached(&key, outcome.is_neighbor_cached);

        self.evict_for_capacity(mailbox, is_background).await?;
        Ok(Some(true))
    }

    /// Refresh a locally cached but stale copy with a freshly fetched value
    pub(crate) async fn refresh_invalid_copy(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
        value: Value,
    ) -> Result<Option<()>> {
        if !self.cache().update(key, value).is_successful() {
            return Ok(Some(()));
        }
        let Some(outcome) = self
            .update_directory(mailbox, key, DirectoryOp::Validate, false)
            .await?
        else {
            return Ok(None);
        };
        if outcome.being_written {
            self.cache().invalidate(key);
        }
        self.evict_for_capacity(mailbox, false).await?;
        Ok(Some(()))
    }

    // =========================================================================
    // Write Lock
    // =========================================================================

    /// Take the write lock on `key`, waiting while another writer holds it
    pub(crate) async fn acquire_write_lock(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
    ) -> Result<Option<()>> {
        loop {
            if !self.is_running() {
                return Ok(None);
            }

            let acquired = if self.cooperation().is_beacon(key) {
                let grant = self
                    .cooperation()
                    .acquire_write_lock_local(key, self.edge_idx())?;
                if grant.acquired
                    && self
                        .invalidate_copies(mailbox, key, grant.invalidate_edges)
                        .await?
                        .is_none()
                {
                    return Ok(None);
                }
                grant.acquired
            } else {
                let beacon = self.cooperation().beacon_of(key);
                let payload = Payload::AcquireWritelockRequest { key: key.clone() };
                let Some(response) = self
                    .round_trip(mailbox, NodeAddr::edge(beacon), payload, false)
                    .await?
                else {
                    return Ok(None);
                };
                match response.payload {
                    Payload::AcquireWritelockResponse { acquired, .. } => acquired,
                    other => return Err(unexpected("AcquireWritelockResponse", &other)),
                }
            };

            if acquired {
                return Ok(Some(()));
            }
            debug!(
                "Edge {} waiting for write lock on {}",
                self.edge_idx(),
                key
            );
            tokio::time::sleep(self.config().writelock_backoff()).await;
        }
    }

    pub(crate) async fn release_write_lock(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
    ) -> Result<Option<()>> {
        if self.cooperation().is_beacon(key) {
            self.cooperation()
                .release_write_lock_local(key, self.edge_idx())?;
            return Ok(Some(()));
        }

        let beacon = self.cooperation().beacon_of(key);
        let payload = Payload::ReleaseWritelockRequest { key: key.clone() };
        let Some(response) = self
            .round_trip(mailbox, NodeAddr::edge(beacon), payload, false)
            .await?
        else {
            return Ok(None);
        };
        match response.payload {
            Payload::ReleaseWritelockResponse { .. } => Ok(Some(())),
            other => Err(unexpected("ReleaseWritelockResponse", &other)),
        }
    }

    /// Beacon side: mark the copies at `edges` stale and wait for their acks
    pub(crate) async fn invalidate_copies(
        &self,
        mailbox: &mut Mailbox,
        key: &Key,
        edges: Vec<u32>,
    ) -> Result<Option<()>> {
        let mut requests = Vec::with_capacity(edges.len());
        for edge in edges {
            if edge == self.edge_idx() {
                self.cache().invalidate(key);
                self.stats().record_invalidation();
            } else {
                requests.push((
                    NodeAddr::edge(edge),
                    Payload::InvalidationRequest { key: key.clone() },
                ));
            }
        }
        if requests.is_empty() {
            return Ok(Some(()));
        }
        Ok(self.fan_out(mailbox, requests, false).await?.map(|_| ()))
    }
}

pub(crate) fn unexpected(expected: &str, got: &Payload) -> Error {
    Error::invariant(format!("expected {}, got {:?}", expected, got.kind()))
}
