//! In-process transport
//!
//! Routes replica calls straight to `SecondaryNode`s living in the same
//! process. Replicas can be marked unreachable to simulate partitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::ReplicaTransport;
use crate::config::SecondaryConfig;
use crate::error::{Error, Result};
use crate::replication::{ReplicateRequest, SecondaryNode, SequenceId};

/// Transport backed by in-process secondaries
#[derive(Default)]
pub struct LocalTransport {
    nodes: HashMap<String, Arc<SecondaryNode>>,
    unreachable: RwLock<HashSet<String>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secondary under its node id
    pub fn with_node(mut self, node: Arc<SecondaryNode>) -> Self {
        self.nodes.insert(node.node_id().to_string(), node);
        self
    }

    /// Make every call to `name` fail with a connection error
    pub async fn disconnect(&self, name: &str) {
        self.unreachable.write().await.insert(name.to_string());
    }

    pub async fn reconnect(&self, name: &str) {
        self.unreachable.write().await.remove(name);
    }

    async fn node(&self, replica: &SecondaryConfig) -> Result<&Arc<SecondaryNode>> {
        if self.unreachable.read().await.contains(&replica.name) {
            return Err(Error::ConnectionFailed {
                address: replica.address.clone(),
                reason: "disconnected".into(),
            });
        }
        self.nodes
            .get(&replica.name)
            .ok_or_else(|| Error::ReplicaNotFound(replica.name.clone()))
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for LocalTransport {
    async fn replicate(&self, replica: &SecondaryConfig, request: &ReplicateRequest) -> Result<()> {
        let node = self.node(replica).await?;
        match node.apply(request.clone()).await {
            Ok(_) => Ok(()),
            // Mirrors the status an HTTP secondary answers with.
            Err(Error::NoReply) => Err(Error::ReplicaRejected {
                replica: replica.name.clone(),
                status: 500,
            }),
            Err(e) => Err(e),
        }
    }

    async fn ping(&self, replica: &SecondaryConfig) -> Result<()> {
        self.node(replica).await.map(|_| ())
    }

    async fn flush(&self, replica: &SecondaryConfig, next_id: SequenceId) -> Result<()> {
        self.node(replica).await?.reset(next_id).await;
        Ok(())
    }
}
