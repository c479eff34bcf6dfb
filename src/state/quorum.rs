//! Quorum Monitor
//!
//! Periodically derives the cluster-wide has-quorum flag from replica health.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use super::membership::{ClusterState, QuorumEvaluation};

/// Majority of `total_nodes`
pub fn quorum_size(total_nodes: usize) -> usize {
    total_nodes / 2 + 1
}

/// Whether `healthy` replicas plus the primary form a majority of `replicas + 1`
pub fn has_quorum(healthy: usize, replicas: usize) -> bool {
    healthy + 1 >= quorum_size(replicas + 1)
}

/// Background evaluator of the quorum flag
pub struct QuorumMonitor {
    state: Arc<ClusterState>,
    interval: Duration,
}

impl QuorumMonitor {
    pub fn new(state: Arc<ClusterState>, interval: Duration) -> Self {
        Self { state, interval }
    }

    /// Evaluate quorum once and store the result
    pub async fn check_once(&self) -> bool {
        let QuorumEvaluation {
            healthy,
            replicas,
            has_quorum: quorum,
            previous,
        } = self.state.evaluate_quorum().await;

        if previous && !quorum {
            tracing::warn!(
                "Quorum lost: {}/{} nodes healthy, {} required",
                healthy + 1,
                replicas + 1,
                quorum_size(replicas + 1)
            );
        } else if !previous && quorum {
            tracing::info!("Quorum restored: {}/{} nodes healthy", healthy + 1, replicas + 1);
        }

        quorum
    }

    /// Evaluate every `interval` until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Quorum monitor started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.check_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Quorum monitor stopped");
    }
}
