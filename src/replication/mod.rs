//! Replication Module
//!
//! Handles write replication from the primary to its secondaries.

pub mod protocol;
pub mod latch;
mod primary;
mod secondary;

pub use protocol::{FaultInjection, FlushRequest, Payload, ReplicateRequest, SequenceId, WriteAck, WriteRequest};
pub use latch::{DualCountdownLatch, PendingGuard};
pub use primary::PrimaryNode;
pub use secondary::SecondaryNode;

use crate::config::NodeRole;

/// Common trait for replication nodes
#[async_trait::async_trait]
pub trait ReplicationNode: Send + Sync {
    /// Get the node ID
    fn node_id(&self) -> &str;

    /// Role this node plays
    fn role(&self) -> NodeRole;

    /// Visible log, in sequence order
    async fn messages(&self) -> Vec<Payload>;
}

#[async_trait::async_trait]
impl ReplicationNode for PrimaryNode {
    fn node_id(&self) -> &str {
        PrimaryNode::node_id(self)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Primary
    }

    async fn messages(&self) -> Vec<Payload> {
        PrimaryNode::messages(self).await
    }
}

#[async_trait::async_trait]
impl ReplicationNode for SecondaryNode {
    fn node_id(&self) -> &str {
        SecondaryNode::node_id(self)
    }

    fn role(&self) -> NodeRole {
        NodeRole::Secondary
    }

    async fn messages(&self) -> Vec<Payload> {
        SecondaryNode::messages(self).await
    }
}
