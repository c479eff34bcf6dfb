//! Cluster Membership State
//!
//! Shared view of replica health and the quorum flag. Written by the
//! health and quorum monitors, read by the write coordinator and the API.

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::quorum;
use crate::config::SecondaryConfig;
use crate::error::{Error, Result};

/// Health classification of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every probe in the last cycle succeeded
    Healthy,
    /// Some probes succeeded
    Suspected,
    /// No probe succeeded
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Suspected => write!(f, "SUSPECTED"),
            HealthStatus::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

/// Health record of a single replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHealth {
    /// Replica name (e.g. "secondary-1")
    pub name: String,
    /// Base URL of the replica
    pub address: String,
    /// Current classification
    pub status: HealthStatus,
    /// Successful probes in the last completed cycle
    pub positive_probes: u32,
    /// When the current status was entered
    pub since: DateTime<Utc>,
    /// When the last probe cycle completed
    pub last_checked: Option<DateTime<Utc>>,
}

impl NodeHealth {
    /// Create a record that starts out healthy
    pub fn new(name: String, address: String) -> Self {
        Self {
            name,
            address,
            status: HealthStatus::Healthy,
            positive_probes: 0,
            since: Utc::now(),
            last_checked: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Debug)]
struct Inner {
    replicas: Vec<NodeHealth>,
    has_quorum: bool,
}

/// Cluster state shared between monitors and the write path
pub struct ClusterState {
    inner: RwLock<Inner>,
}

impl ClusterState {
    /// Create state for the configured replicas.
    ///
    /// Replicas start healthy and the quorum flag starts set, so writes are
    /// admitted before the first probe cycle completes.
    pub fn new(secondaries: &[SecondaryConfig]) -> Self {
        let replicas = secondaries
            .iter()
            .map(|s| NodeHealth::new(s.name.clone(), s.address.clone()))
            .collect();

        Self {
            inner: RwLock::new(Inner {
                replicas,
                has_quorum: true,
            }),
        }
    }

    /// Current status of a replica
    pub async fn status_of(&self, name: &str) -> Option<HealthStatus> {
        let inner = self.inner.read().await;
        inner.replicas.iter().find(|r| r.name == name).map(|r| r.status)
    }

    /// Record a completed probe cycle for a replica.
    ///
    /// Returns the previous status when the classification changed.
    pub async fn record_probe(
        &self,
        name: &str,
        status: HealthStatus,
        positive_probes: u32,
    ) -> Result<Option<HealthStatus>> {
        let mut inner = self.inner.write().await;
        let replica = inner
            .replicas
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::ReplicaNotFound(name.to_string()))?;

        let now = Utc::now();
        replica.positive_probes = positive_probes;
        replica.last_checked = Some(now);

        if replica.status == status {
            return Ok(None);
        }

        let previous = replica.status;
        replica.status = status;
        replica.since = now;

        match status {
            HealthStatus::Healthy => {
                tracing::info!("Replica {} recovered ({} -> {})", name, previous, status)
            }
            HealthStatus::Suspected => {
                tracing::warn!("Replica {} is {} ({} probe(s) answered)", name, status, positive_probes)
            }
            HealthStatus::Unhealthy => {
                tracing::warn!("Replica {} is {} (was {})", name, status, previous)
            }
        }

        Ok(Some(previous))
    }

    /// Number of replicas currently classified healthy
    pub async fn healthy_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.replicas.iter().filter(|r| r.is_healthy()).count()
    }

    /// Whether the last quorum evaluation succeeded
    pub async fn has_quorum(&self) -> bool {
        self.inner.read().await.has_quorum
    }

    /// Store a quorum evaluation, returning the previous value
    pub async fn set_quorum(&self, has_quorum: bool) -> bool {
        let mut inner = self.inner.write().await;
        std::mem::replace(&mut inner.has_quorum, has_quorum)
    }

    /// Count healthy replicas and store the resulting quorum flag, all
    /// under one write guard
    pub async fn evaluate_quorum(&self) -> QuorumEvaluation {
        let mut inner = self.inner.write().await;
        let healthy = inner.replicas.iter().filter(|r| r.is_healthy()).count();
        let replicas = inner.replicas.len();
        let has_quorum = quorum::has_quorum(healthy, replicas);
        let previous = std::mem::replace(&mut inner.has_quorum, has_quorum);

        QuorumEvaluation {
            healthy,
            replicas,
            has_quorum,
            previous,
        }
    }

    /// Replica name to status
    pub async fn health_map(&self) -> BTreeMap<String, HealthStatus> {
        let inner = self.inner.read().await;
        inner
            .replicas
            .iter()
            .map(|r| (r.name.clone(), r.status))
            .collect()
    }

    /// Copy of every replica record, in configuration order
    pub async fn snapshot(&self) -> Vec<NodeHealth> {
        self.inner.read().await.replicas.clone()
    }

    /// Get cluster summary
    pub async fn summary(&self) -> ClusterSummary {
        let inner = self.inner.read().await;
        let total_nodes = inner.replicas.len() + 1;

        let mut summary = ClusterSummary {
            total_nodes,
            quorum_size: quorum::quorum_size(total_nodes),
            has_quorum: inner.has_quorum,
            healthy_replicas: 0,
            suspected_replicas: 0,
            unhealthy_replicas: 0,
        };

        for replica in &inner.replicas {
            match replica.status {
                HealthStatus::Healthy => summary.healthy_replicas += 1,
                HealthStatus::Suspected => summary.suspected_replicas += 1,
                HealthStatus::Unhealthy => summary.unhealthy_replicas += 1,
            }
        }

        summary
    }
}

/// Outcome of one quorum evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumEvaluation {
    /// Healthy replicas, primary excluded
    pub healthy: usize,
    pub replicas: usize,
    pub has_quorum: bool,
    /// Flag before this evaluation
    pub previous: bool,
}

/// Cluster summary information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub quorum_size: usize,
    pub has_quorum: bool,
    pub healthy_replicas: usize,
    pub suspected_replicas: usize,
    pub unhealthy_replicas: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secondaries(n: usize) -> Vec<SecondaryConfig> {
        (1..=n)
            .map(|i| SecondaryConfig {
                name: format!("secondary-{}", i),
                address: format!("http://secondary-{}:808{}", i, i),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initial_state() {
        let state = ClusterState::new(&secondaries(2));

        assert_eq!(state.snapshot().await.len(), 2);
        assert_eq!(state.healthy_count().await, 2);
        assert!(state.has_quorum().await);
        assert_eq!(state.status_of("secondary-1").await, Some(HealthStatus::Healthy));
        assert_eq!(state.status_of("secondary-9").await, None);
    }

    #[tokio::test]
    async fn test_record_probe_transitions() {
        let state = ClusterState::new(&secondaries(2));

        let changed = state
            .record_probe("secondary-1", HealthStatus::Suspected, 1)
            .await
            .unwrap();
        assert_eq!(changed, Some(HealthStatus::Healthy));

        let unchanged = state
            .record_probe("secondary-1", HealthStatus::Suspected, 2)
            .await
            .unwrap();
        assert_eq!(unchanged, None);

        assert_eq!(state.healthy_count().await, 1);
        let record = &state.snapshot().await[0];
        assert_eq!(record.positive_probes, 2);
        assert!(record.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_and_recovery_transitions() {
        let state = ClusterState::new(&secondaries(1));

        let lost = state
            .record_probe("secondary-1", HealthStatus::Unhealthy, 0)
            .await
            .unwrap();
        assert_eq!(lost, Some(HealthStatus::Healthy));
        assert_eq!(state.status_of("secondary-1").await, Some(HealthStatus::Unhealthy));
        let down_since = state.snapshot().await[0].since;

        let still_down = state
            .record_probe("secondary-1", HealthStatus::Unhealthy, 0)
            .await
            .unwrap();
        assert_eq!(still_down, None);
        assert_eq!(state.snapshot().await[0].since, down_since);

        let recovered = state
            .record_probe("secondary-1", HealthStatus::Healthy, 3)
            .await
            .unwrap();
        assert_eq!(recovered, Some(HealthStatus::Unhealthy));
        assert_eq!(state.healthy_count().await, 1);
    }

    #[tokio::test]
    async fn test_evaluate_quorum() {
        let state = ClusterState::new(&secondaries(2));
        state.record_probe("secondary-1", HealthStatus::Unhealthy, 0).await.unwrap();
        state.record_probe("secondary-2", HealthStatus::Suspected, 1).await.unwrap();

        let lost = state.evaluate_quorum().await;
        assert_eq!(
            lost,
            QuorumEvaluation {
                healthy: 0,
                replicas: 2,
                has_quorum: false,
                previous: true,
            }
        );
        assert!(!state.has_quorum().await);

        state.record_probe("secondary-2", HealthStatus::Healthy, 3).await.unwrap();
        let restored = state.evaluate_quorum().await;
        assert!(restored.has_quorum);
        assert!(!restored.previous);
    }

    #[tokio::test]
    async fn test_unknown_replica() {
        let state = ClusterState::new(&secondaries(1));
        let result = state.record_probe("secondary-5", HealthStatus::Healthy, 3).await;
        assert!(matches!(result, Err(Error::ReplicaNotFound(_))));
    }

    #[tokio::test]
    async fn test_summary_and_quorum_flag() {
        let state = ClusterState::new(&secondaries(2));
        state.record_probe("secondary-2", HealthStatus::Unhealthy, 0).await.unwrap();
        assert!(state.set_quorum(false).await);

        let summary = state.summary().await;
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.quorum_size, 2);
        assert!(!summary.has_quorum);
        assert_eq!(summary.healthy_replicas, 1);
        assert_eq!(summary.unhealthy_replicas, 1);

        let map = state.health_map().await;
        assert_eq!(map["secondary-2"], HealthStatus::Unhealthy);
        assert_eq!(serde_json::to_value(map).unwrap()["secondary-1"], "healthy");
    }
}
