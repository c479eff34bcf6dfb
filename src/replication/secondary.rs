//! Secondary Node Implementation
//!
//! Handles replica responsibilities: receiving replicated writes,
//! deduplicating them, and exposing them in sequence order without gaps.

use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

use super::protocol::{Payload, ReplicateRequest, SequenceId};
use crate::error::{Error, Result};

/// Replica-local log state, guarded by one lock
#[derive(Debug, Default)]
struct ReplicaState {
    /// Visible log, gap-free in sequence order
    log: Vec<Payload>,
    /// Writes that arrived before their predecessor
    staging: BTreeMap<SequenceId, Payload>,
    /// Ids already accepted
    seen: HashSet<SequenceId>,
    /// Next id the log is waiting for
    next_id: SequenceId,
}

impl ReplicaState {
    /// Move the contiguous prefix of the staging buffer into the log
    fn drain(&mut self) -> usize {
        let mut moved = 0;
        while let Some(payload) = self.staging.remove(&self.next_id) {
            self.log.push(payload);
            self.next_id += 1;
            moved += 1;
        }
        moved
    }
}

/// Secondary node state
pub struct SecondaryNode {
    /// Node ID
    node_id: String,
    /// Log, staging buffer, seen ids and cursor
    state: Mutex<ReplicaState>,
}

impl SecondaryNode {
    /// Create an empty secondary
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            state: Mutex::new(ReplicaState::default()),
        }
    }

    /// Get this node's ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Apply a replicated write.
    ///
    /// Duplicates are acknowledged without changing the log, and the first
    /// payload seen for an id wins. Early arrivals are staged until every
    /// smaller id has been appended.
    pub async fn apply(&self, request: ReplicateRequest) -> Result<Payload> {
        let faults = request.faults();
        if faults.noreply {
            tracing::warn!("Dropping write {} on {} (noreply)", request.id, self.node_id);
            return Err(Error::NoReply);
        }

        if let Some(delay) = faults.delay() {
            tracing::debug!("Delaying write {} on {} by {:?}", request.id, self.node_id, delay);
            tokio::time::sleep(delay).await;
        }

        let ReplicateRequest { message, id, .. } = request;
        let mut state = self.state.lock().await;

        if id < state.next_id || !state.seen.insert(id) {
            tracing::debug!("Write {} already applied on {}", id, self.node_id);
            return Ok(message);
        }

        state.staging.insert(id, message.clone());
        let moved = state.drain();

        if moved == 0 {
            tracing::debug!(
                "Staged write {} on {} (waiting for {})",
                id,
                self.node_id,
                state.next_id
            );
        } else {
            tracing::trace!("Appended {} write(s) on {}, next id {}", moved, self.node_id, state.next_id);
        }

        Ok(message)
    }

    /// Visible log
    pub async fn messages(&self) -> Vec<Payload> {
        self.state.lock().await.log.clone()
    }

    /// Number of staged writes not yet visible
    pub async fn pending(&self) -> usize {
        self.state.lock().await.staging.len()
    }

    /// Next sequence id the log is waiting for
    pub async fn next_expected(&self) -> SequenceId {
        self.state.lock().await.next_id
    }

    /// Clear log, staging buffer and seen ids, and wait for `next_id` next.
    ///
    /// Writes below `next_id` that are still in flight count as already
    /// applied when they arrive.
    pub async fn reset(&self, next_id: SequenceId) {
        let mut state = self.state.lock().await;
        *state = ReplicaState {
            next_id,
            ..ReplicaState::default()
        };
        tracing::info!("Secondary {} reset, next id {}", self.node_id, next_id);
    }
}
