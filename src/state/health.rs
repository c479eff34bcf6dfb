//! Health Monitor
//!
//! Periodically probes every replica several times and classifies it as
//! healthy, suspected or unhealthy.

use std::sync::Arc;
use std::time::Duration;
use futures::future::join_all;
use tokio::sync::watch;

use super::membership::{ClusterState, HealthStatus};
use crate::config::{ClusterConfig, SecondaryConfig};
use crate::network::ReplicaTransport;

/// Classify a replica from its successful probes out of `total`
pub fn classify(positive: u32, total: u32) -> HealthStatus {
    if positive >= total {
        HealthStatus::Healthy
    } else if positive > 0 {
        HealthStatus::Suspected
    } else {
        HealthStatus::Unhealthy
    }
}

/// Background prober for replica health
pub struct HealthMonitor {
    state: Arc<ClusterState>,
    transport: Arc<dyn ReplicaTransport>,
    secondaries: Vec<SecondaryConfig>,
    /// Probes per replica per cycle
    heartbeats_number: u32,
    /// Sleep between cycles
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(
        config: &ClusterConfig,
        state: Arc<ClusterState>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        Self {
            state,
            transport,
            secondaries: config.secondaries.clone(),
            heartbeats_number: config.heartbeats_number,
            interval: config.heartbeat_interval(),
        }
    }

    /// Send the configured number of probes, one after another
    async fn probe(&self, replica: &SecondaryConfig) -> u32 {
        let mut positive = 0;
        for _ in 0..self.heartbeats_number {
            match self.transport.ping(replica).await {
                Ok(()) => positive += 1,
                Err(e) => tracing::trace!("Probe to {} failed: {}", replica.name, e),
            }
        }
        positive
    }

    /// Run one probe cycle and publish the results.
    ///
    /// Replicas are probed concurrently; the shared state is only locked
    /// once every probe has finished.
    pub async fn check_once(&self) {
        let results = join_all(self.secondaries.iter().map(|replica| async move {
            (replica, self.probe(replica).await)
        }))
        .await;

        for (replica, positive) in results {
            let status = classify(positive, self.heartbeats_number);
            if let Err(e) = self.state.record_probe(&replica.name, status, positive).await {
                tracing::error!("Failed to record health of {}: {}", replica.name, e);
            }
        }
    }

    /// Probe every `interval` until shutdown is signalled
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Health monitor started ({} replica(s), {} probe(s) every {:?})",
            self.secondaries.len(),
            self.heartbeats_number,
            self.interval
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => self.check_once().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::network::LocalTransport;
    use crate::replication::{ReplicateRequest, SecondaryNode, SequenceId};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cluster_config(n: usize) -> ClusterConfig {
        ClusterConfig {
            heartbeat_interval_ms: 10,
            secondaries: (1..=n)
                .map(|i| SecondaryConfig {
                    name: format!("secondary-{}", i),
                    address: format!("http://secondary-{}:808{}", i, i),
                })
                .collect(),
            ..ClusterConfig::default()
        }
    }

    fn local_transport(n: usize) -> LocalTransport {
        (1..=n).fold(LocalTransport::new(), |t, i| {
            t.with_node(Arc::new(SecondaryNode::new(format!("secondary-{}", i))))
        })
    }

    /// Answers every second probe
    struct FlakyTransport {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ReplicaTransport for FlakyTransport {
        async fn replicate(&self, _replica: &SecondaryConfig, _request: &ReplicateRequest) -> Result<()> {
            Ok(())
        }

        async fn ping(&self, replica: &SecondaryConfig) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                Ok(())
            } else {
                Err(Error::ConnectionTimeout(replica.name.clone()))
            }
        }

        async fn flush(&self, _replica: &SecondaryConfig, _next_id: SequenceId) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_classify_three_probes() {
        assert_eq!(classify(3, 3), HealthStatus::Healthy);
        assert_eq!(classify(2, 3), HealthStatus::Suspected);
        assert_eq!(classify(1, 3), HealthStatus::Suspected);
        assert_eq!(classify(0, 3), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_unreachable_replica_becomes_unhealthy() {
        let config = cluster_config(2);
        let state = Arc::new(ClusterState::new(&config.secondaries));
        let transport = Arc::new(local_transport(2));
        transport.disconnect("secondary-2").await;

        let monitor = HealthMonitor::new(&config, Arc::clone(&state), transport.clone());
        monitor.check_once().await;
        assert_eq!(state.status_of("secondary-1").await, Some(HealthStatus::Healthy));
        assert_eq!(state.status_of("secondary-2").await, Some(HealthStatus::Unhealthy));

        transport.reconnect("secondary-2").await;
        monitor.check_once().await;
        assert_eq!(state.status_of("secondary-2").await, Some(HealthStatus::Healthy));
    }

    #[tokio::test]
    async fn test_partial_probes_mark_suspected() {
        let config = cluster_config(1);
        let state = Arc::new(ClusterState::new(&config.secondaries));
        let transport = Arc::new(FlakyTransport { calls: AtomicU32::new(0) });

        let monitor = HealthMonitor::new(&config, Arc::clone(&state), transport);
        monitor.check_once().await;

        let record = &state.snapshot().await[0];
        assert_eq!(record.status, HealthStatus::Suspected);
        assert_eq!(record.positive_probes, 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let config = cluster_config(1);
        let state = Arc::new(ClusterState::new(&config.secondaries));
        let transport = Arc::new(local_transport(1));
        transport.disconnect("secondary-1").await;

        let monitor = Arc::new(HealthMonitor::new(&config, Arc::clone(&state), transport));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor.run(rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.status_of("secondary-1").await, Some(HealthStatus::Unhealthy));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
