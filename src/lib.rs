//! WolfLog - Replicated Message Log
//!
//! A small primary/secondary replication cluster. The primary assigns every
//! client write a sequence id and replicates it to all secondaries, answering
//! the client once the requested write concern is met.
//!
//! # Architecture
//!
//! Writes are admitted only while the cluster has quorum. A background
//! health monitor probes each secondary and a quorum monitor derives the
//! cluster-wide quorum flag from those results. Each write fans out to the
//! secondaries concurrently and a dual countdown latch releases the client
//! as soon as enough acknowledgments arrived or every secondary answered.
//!
//! # Features
//!
//! - Per-request write concern (`w`)
//! - Tri-state replica health (healthy, suspected, unhealthy)
//! - Direct sends to healthy replicas, bounded retries to the rest
//! - Gap-free, deduplicated replica logs under out-of-order delivery
//! - Per-replica fault injection (delay, noreply) for testing
//! - HTTP API for writes, reads, health and status

pub mod config;
pub mod error;
pub mod state;
pub mod replication;
pub mod network;
pub mod api;

pub use config::WolfLogConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{NodeRole, WolfLogConfig};
    pub use crate::error::{Error, Result};
    pub use crate::replication::{
        DualCountdownLatch, FaultInjection, PrimaryNode, SecondaryNode, WriteAck, WriteRequest,
    };
    pub use crate::state::{ClusterState, HealthStatus};
    pub use crate::network::{HttpTransport, ReplicaTransport};
}
