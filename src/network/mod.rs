//! Network Module
//!
//! Outbound calls from the primary to its replicas. The write coordinator
//! and health monitor only see the `ReplicaTransport` trait; `HttpTransport`
//! speaks to real secondaries, `LocalTransport` to in-process ones.

mod client;
pub mod local;
pub mod retry;

pub use client::HttpTransport;
pub use local::LocalTransport;
pub use retry::{retry_with_backoff, Backoff};

use crate::config::{RetryConfig, SecondaryConfig};
use crate::error::Result;
use crate::replication::{ReplicateRequest, SequenceId};

/// Calls the primary makes to a replica
#[async_trait::async_trait]
pub trait ReplicaTransport: Send + Sync {
    /// Deliver one write; Ok only on a 2xx acknowledgment
    async fn replicate(&self, replica: &SecondaryConfig, request: &ReplicateRequest) -> Result<()>;

    /// One liveness probe; Ok only on a 200 response
    async fn ping(&self, replica: &SecondaryConfig) -> Result<()>;

    /// Ask the replica to clear its log and continue from `next_id`
    async fn flush(&self, replica: &SecondaryConfig, next_id: SequenceId) -> Result<()>;
}

/// How a write is delivered to one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Single attempt
    Direct,
    /// Bounded exponential backoff on retryable failures
    Retrying,
}

/// Deliver a write using the given mode
pub async fn send_write(
    transport: &dyn ReplicaTransport,
    replica: &SecondaryConfig,
    request: &ReplicateRequest,
    mode: SendMode,
    retry: &RetryConfig,
) -> Result<()> {
    match mode {
        SendMode::Direct => transport.replicate(replica, request).await,
        SendMode::Retrying => {
            retry_with_backoff(retry, || transport.replicate(replica, request)).await
        }
    }
}
