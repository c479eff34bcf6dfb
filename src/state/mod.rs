//! State Management Module
//!
//! Replica health tracking and the quorum flag, plus the background
//! monitors that keep them current.

mod membership;
pub mod health;
pub mod quorum;

pub use membership::{ClusterState, ClusterSummary, HealthStatus, NodeHealth, QuorumEvaluation};
pub use health::HealthMonitor;
pub use quorum::QuorumMonitor;
