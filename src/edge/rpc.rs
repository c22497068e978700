//! Round Trips
//!
//! Every cross-edge request follows the same pattern: send, wait on the
//! task's own mailbox up to the request timeout, resend what is still
//! unanswered. While the edge runs this never gives up; once it stops the
//! round trip resolves as finished (`Ok(None)`), which is not an error.
//!
//! ```text
//!   pending{request_id -> (dst, msg)}
//!        │ send all unanswered
//!        ▼
//!   drain mailbox until deadline ──▶ match request_id ──▶ responses
//!        │ timeout
//!        └── still running? resend : finished
//! ```

use std::collections::HashMap;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::EdgeNode;
use crate::error::Result;
use crate::network::{Mailbox, Message, NodeAddr, Payload};

impl EdgeNode {
    /// Send one request and wait for its response
    pub(crate) async fn round_trip(
        &self,
        mailbox: &mut Mailbox,
        dst: NodeAddr,
        payload: Payload,
        is_background: bool,
    ) -> Result<Option<Message>> {
        let responses = self
            .fan_out(mailbox, vec![(dst, payload)], is_background)
            .await?;
        Ok(responses.and_then(|mut r| r.pop()))
    }

    /// Send several requests in parallel and collect every response
    ///
    /// Responses are matched by request id; anything else arriving on the
    /// mailbox is logged and dropped. Piggybacked victim syncsets are merged
    /// as responses arrive.
    pub(crate) async fn fan_out(
        &self,
        mailbox: &mut Mailbox,
        requests: Vec<(NodeAddr, Payload)>,
        is_background: bool,
    ) -> Result<Option<Vec<Message>>> {
        let source = mailbox.addr();
        let mut pending: HashMap<Uuid, (NodeAddr, Message)> = requests
            .into_iter()
            .map(|(dst, payload)| {
                let message = Message::request(source, payload, is_background);
                (message.request_id, (dst, message))
            })
            .collect();
        let mut responses = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            if !self.is_running() {
                debug!(
                    "Edge {} stopping with {} requests unanswered",
                    self.edge_idx(),
                    pending.len()
                );
                return Ok(None);
            }

            for (dst, message) in pending.values() {
                if let Err(e) = self.transport().send(*dst, message.clone()).await {
                    warn!("Edge {} failed to send {:?}: {}", self.edge_idx(), message.kind(), e);
                }
            }

            let deadline = Instant::now() + self.config().request_timeout();
            while !pending.is_empty() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let Some(response) = mailbox.recv(remaining).await else {
                    break;
                };
                if pending.remove(&response.request_id).is_some() {
                    self.merge_inbound(&response.payload);
                    responses.push(response);
                } else {
                    self.stats().record_unmatched_response();
                    warn!(
                        "Edge {} dropping unmatched {:?} from {}",
                        self.edge_idx(),
                        response.kind(),
                        response.source
                    );
                }
            }

            if !pending.is_empty() {
                self.stats().record_retry();
                for (dst, message) in pending.values() {
                    warn!(
                        "Edge {} timed out waiting on {:?} to {}, resending",
                        self.edge_idx(),
                        message.kind(),
                        dst
                    );
                }
            }
        }

        Ok(Some(responses))
    }
}
