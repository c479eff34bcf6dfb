//! Primary Node Implementation
//!
//! Handles primary responsibilities: admitting writes behind the quorum
//! gate, assigning sequence ids, and fanning writes out to the replicas
//! until the requested write concern is met or cannot be met.

use std::sync::Arc;
use futures::future::join_all;
use tokio::sync::Mutex;

use super::latch::DualCountdownLatch;
use super::protocol::{FaultInjection, Payload, ReplicateRequest, SequenceId, WriteAck, WriteRequest};
use crate::config::{ClusterConfig, RetryConfig, SecondaryConfig};
use crate::error::{Error, Result};
use crate::network::{send_write, ReplicaTransport, SendMode};
use crate::state::{quorum, ClusterState, HealthStatus};

/// Sequence counter and the primary's own log, guarded together
#[derive(Debug, Default)]
struct PrimaryLog {
    next_id: SequenceId,
    messages: Vec<Payload>,
}

/// Primary node state
pub struct PrimaryNode {
    /// Node ID
    node_id: String,
    /// Replicas, in configuration order
    secondaries: Vec<SecondaryConfig>,
    /// Health records and quorum flag
    cluster: Arc<ClusterState>,
    /// Outbound calls to replicas
    transport: Arc<dyn ReplicaTransport>,
    /// Backoff policy for replicas that are not healthy
    retry: RetryConfig,
    /// Sequence counter and log
    log: Mutex<PrimaryLog>,
}

impl PrimaryNode {
    /// Create a new primary node
    pub fn new(
        node_id: String,
        config: &ClusterConfig,
        cluster: Arc<ClusterState>,
        transport: Arc<dyn ReplicaTransport>,
    ) -> Self {
        Self {
            node_id,
            secondaries: config.secondaries.clone(),
            cluster,
            transport,
            retry: config.retry.clone(),
            log: Mutex::new(PrimaryLog::default()),
        }
    }

    /// Get this node's ID
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn secondaries(&self) -> &[SecondaryConfig] {
        &self.secondaries
    }

    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    /// Acknowledgments needed from replicas for write concern `w`
    fn shortfall_for(&self, w: Option<i64>) -> usize {
        let total = self.secondaries.len() as i64 + 1;
        let w = w.unwrap_or(total).clamp(1, total);
        (w - 1) as usize
    }

    /// Submit a write.
    ///
    /// The write is rejected without side effects when the cluster has no
    /// quorum. Otherwise it is assigned the next sequence id, appended to
    /// the primary log and sent to every replica. Returns once `w - 1`
    /// replicas acknowledged or every replica answered. A write that falls
    /// short stays wherever it was applied.
    pub async fn submit(&self, request: WriteRequest) -> Result<WriteAck> {
        if !self.cluster.has_quorum().await {
            let healthy = self.cluster.healthy_count().await + 1;
            let required = quorum::quorum_size(self.secondaries.len() + 1);
            tracing::warn!("Rejecting write: {}/{} nodes healthy", healthy, required);
            return Err(Error::NoQuorum { healthy, required });
        }

        let faults = self
            .secondaries
            .iter()
            .map(|replica| request.faults_for(&replica.name))
            .collect::<Result<Vec<FaultInjection>>>()?;

        let shortfall = self.shortfall_for(request.w);
        let message = request.message;

        let id = {
            let mut log = self.log.lock().await;
            let id = log.next_id;
            log.next_id += 1;
            log.messages.push(message.clone());
            id
        };

        tracing::debug!(
            "Write {} accepted, waiting for {} of {} replica(s)",
            id,
            shortfall,
            self.secondaries.len()
        );

        let latch = Arc::new(DualCountdownLatch::new(self.secondaries.len(), shortfall));

        for (replica, faults) in self.secondaries.iter().zip(faults) {
            let mode = match self.cluster.status_of(&replica.name).await {
                Some(HealthStatus::Healthy) => SendMode::Direct,
                _ => SendMode::Retrying,
            };

            let guard = latch.pending_guard();
            let transport = Arc::clone(&self.transport);
            let replica = replica.clone();
            let retry = self.retry.clone();
            let request = ReplicateRequest::new(message.clone(), id, faults);

            tokio::spawn(async move {
                match send_write(transport.as_ref(), &replica, &request, mode, &retry).await {
                    Ok(()) => guard.acknowledge(),
                    Err(e) => tracing::warn!(
                        "Replication of write {} to {} failed: {}",
                        id,
                        replica.name,
                        e
                    ),
                }
            });
        }

        latch.wait().await;

        let missing = latch.remaining_shortfall();
        if missing > 0 {
            tracing::warn!("Write {} missing {} acknowledgment(s)", id, missing);
            return Err(Error::WriteConcernNotMet {
                sequence_id: id,
                shortfall: missing,
            });
        }

        Ok(WriteAck { id, message })
    }

    /// Primary log, in sequence order
    pub async fn messages(&self) -> Vec<Payload> {
        self.log.lock().await.messages.clone()
    }

    /// Number of writes in the primary log
    pub async fn log_len(&self) -> usize {
        self.log.lock().await.messages.len()
    }

    /// Clear the primary log, then ask every replica to do the same.
    ///
    /// Sequence ids are never reused: replicas restart their logs at the
    /// current counter, so writes still in flight from before the flush are
    /// ignored when they land. The log stays locked until every replica
    /// answered, so no newer id reaches a replica ahead of its reset.
    /// Replica failures are logged, not returned.
    pub async fn flush(&self) -> Result<()> {
        let mut log = self.log.lock().await;
        log.messages.clear();
        let next_id = log.next_id;
        tracing::info!("Primary {} flushed, next id {}", self.node_id, next_id);

        let results = join_all(self.secondaries.iter().map(|replica| async move {
            (replica, self.transport.flush(replica, next_id).await)
        }))
        .await;

        for (replica, result) in results {
            if let Err(e) = result {
                tracing::warn!("Failed to flush {}: {}", replica.name, e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::LocalTransport;
    use crate::replication::SecondaryNode;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    struct Cluster {
        primary: Arc<PrimaryNode>,
        replicas: Vec<Arc<SecondaryNode>>,
        state: Arc<ClusterState>,
    }

    fn cluster_config(n: usize) -> ClusterConfig {
        ClusterConfig {
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
            secondaries: (1..=n)
                .map(|i| SecondaryConfig {
                    name: format!("secondary-{}", i),
                    address: format!("http://secondary-{}:808{}", i, i),
                })
                .collect(),
            ..ClusterConfig::default()
        }
    }

    fn cluster(n: usize) -> Cluster {
        let config = cluster_config(n);
        let replicas: Vec<_> = (1..=n)
            .map(|i| Arc::new(SecondaryNode::new(format!("secondary-{}", i))))
            .collect();
        let transport = replicas
            .iter()
            .fold(LocalTransport::new(), |t, r| t.with_node(Arc::clone(r)));
        let state = Arc::new(ClusterState::new(&config.secondaries));
        let primary = Arc::new(PrimaryNode::new(
            "primary".into(),
            &config,
            Arc::clone(&state),
            Arc::new(transport),
        ));
        Cluster { primary, replicas, state }
    }

    fn noreply() -> FaultInjection {
        FaultInjection { delay: None, noreply: true }
    }

    fn delayed(secs: f64) -> FaultInjection {
        FaultInjection { delay: Some(secs), noreply: false }
    }

    #[tokio::test]
    async fn test_default_write_concern_waits_for_all() {
        let c = cluster(2);
        let ack = c.primary.submit(WriteRequest::new(json!("hello"))).await.unwrap();

        assert_eq!(ack.id, 0);
        assert_eq!(ack.message, json!("hello"));
        assert_eq!(c.primary.messages().await, vec![json!("hello")]);
        for replica in &c.replicas {
            assert_eq!(replica.messages().await, vec![json!("hello")]);
        }
    }

    #[tokio::test]
    async fn test_one_noreply_with_w2_succeeds() {
        let c = cluster(2);
        let request = WriteRequest::new(json!("m"))
            .with_write_concern(2)
            .with_faults("secondary-2", noreply());

        c.primary.submit(request).await.unwrap();
        assert_eq!(c.replicas[0].messages().await, vec![json!("m")]);
        assert!(c.replicas[1].messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_one_noreply_with_w3_reports_shortfall() {
        let c = cluster(2);
        let request = WriteRequest::new(json!("m"))
            .with_write_concern(3)
            .with_faults("secondary-1", noreply());

        let err = c.primary.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::WriteConcernNotMet { sequence_id: 0, shortfall: 1 }));

        // No rollback on the primary or the replica that applied it.
        assert_eq!(c.primary.log_len().await, 1);
        assert_eq!(c.replicas[1].messages().await, vec![json!("m")]);
    }

    #[tokio::test]
    async fn test_all_replicas_fail_reports_full_shortfall() {
        let c = cluster(3);
        let request = WriteRequest::new(json!("m"))
            .with_faults("secondary-1", noreply())
            .with_faults("secondary-2", noreply())
            .with_faults("secondary-3", noreply());

        let err = c.primary.submit(request).await.unwrap_err();
        assert_eq!(err.shortfall(), Some(3));
    }

    #[tokio::test]
    async fn test_w1_does_not_wait_and_keeps_replicating() {
        let c = cluster(2);
        let request = WriteRequest::new(json!("m"))
            .with_write_concern(1)
            .with_faults("secondary-1", delayed(0.3))
            .with_faults("secondary-2", delayed(0.3));

        let started = Instant::now();
        c.primary.submit(request).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(250));
        assert!(c.replicas[0].messages().await.is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        for replica in &c.replicas {
            assert_eq!(replica.messages().await, vec![json!("m")]);
        }
    }

    #[tokio::test]
    async fn test_write_concern_is_clamped() {
        let c = cluster(2);
        assert_eq!(c.primary.shortfall_for(None), 2);
        assert_eq!(c.primary.shortfall_for(Some(10)), 2);
        assert_eq!(c.primary.shortfall_for(Some(0)), 0);
        assert_eq!(c.primary.shortfall_for(Some(-4)), 0);
        assert_eq!(c.primary.shortfall_for(Some(2)), 1);
    }

    #[tokio::test]
    async fn test_no_quorum_rejects_without_side_effects() {
        let c = cluster(2);
        c.state.set_quorum(false).await;
        c.state.record_probe("secondary-1", HealthStatus::Unhealthy, 0).await.unwrap();
        c.state.record_probe("secondary-2", HealthStatus::Unhealthy, 0).await.unwrap();

        let err = c.primary.submit(WriteRequest::new(json!("m"))).await.unwrap_err();
        assert!(matches!(err, Error::NoQuorum { healthy: 1, required: 2 }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(c.primary.log_len().await, 0);
        for replica in &c.replicas {
            assert!(replica.messages().await.is_empty());
        }

        c.state.set_quorum(true).await;
        let ack = c.primary.submit(WriteRequest::new(json!("m")).with_write_concern(1)).await.unwrap();
        assert_eq!(ack.id, 0);
    }

    #[tokio::test]
    async fn test_invalid_faults_rejected_before_id_assignment() {
        let c = cluster(1);
        let mut request = WriteRequest::new(json!("m"));
        request.replicas.insert("secondary-1".into(), json!({"delay": "soon"}));

        let err = c.primary.submit(request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));

        let ack = c.primary.submit(WriteRequest::new(json!("next"))).await.unwrap();
        assert_eq!(ack.id, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ids_are_unique() {
        let c = cluster(2);
        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let primary = Arc::clone(&c.primary);
                tokio::spawn(async move { primary.submit(WriteRequest::new(json!(i))).await })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap().id);
        }
        assert_eq!(ids, (0..40).collect::<HashSet<_>>());

        // Every replica converges on the primary's order.
        let primary_log = c.primary.messages().await;
        for replica in &c.replicas {
            assert_eq!(replica.messages().await, primary_log);
        }
    }

    #[tokio::test]
    async fn test_flush_resets_cluster() {
        let c = cluster(2);
        c.primary.submit(WriteRequest::new(json!("a"))).await.unwrap();
        c.primary.submit(WriteRequest::new(json!("b"))).await.unwrap();

        c.primary.flush().await.unwrap();
        assert_eq!(c.primary.log_len().await, 0);
        for replica in &c.replicas {
            assert!(replica.messages().await.is_empty());
        }

        let ack = c.primary.submit(WriteRequest::new(json!("c"))).await.unwrap();
        assert_eq!(ack.id, 2);
        assert_eq!(c.primary.messages().await, vec![json!("c")]);
        for replica in &c.replicas {
            assert_eq!(replica.messages().await, vec![json!("c")]);
        }
    }

    #[tokio::test]
    async fn test_write_in_flight_across_flush_is_dropped() {
        let c = cluster(2);
        let request = WriteRequest::new(json!("old"))
            .with_write_concern(1)
            .with_faults("secondary-1", delayed(0.2));
        c.primary.submit(request).await.unwrap();

        c.primary.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        let ack = c.primary.submit(WriteRequest::new(json!("new"))).await.unwrap();
        assert_eq!(ack.id, 1);
        assert_eq!(c.primary.messages().await, vec![json!("new")]);
        for replica in &c.replicas {
            assert_eq!(replica.messages().await, vec![json!("new")]);
        }
    }

    /// Answers 503 to the first `failures` writes, then delegates
    struct FlakyTransport {
        inner: LocalTransport,
        failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ReplicaTransport for FlakyTransport {
        async fn replicate(&self, replica: &SecondaryConfig, request: &ReplicateRequest) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(Error::ReplicaRejected { replica: replica.name.clone(), status: 503 });
            }
            self.inner.replicate(replica, request).await
        }

        async fn ping(&self, replica: &SecondaryConfig) -> Result<()> {
            self.inner.ping(replica).await
        }

        async fn flush(&self, replica: &SecondaryConfig, next_id: SequenceId) -> Result<()> {
            self.inner.flush(replica, next_id).await
        }
    }

    fn flaky_primary(failures: u32) -> (PrimaryNode, Arc<ClusterState>, Arc<SecondaryNode>) {
        let config = cluster_config(1);
        let replica = Arc::new(SecondaryNode::new("secondary-1"));
        let transport = FlakyTransport {
            inner: LocalTransport::new().with_node(Arc::clone(&replica)),
            failures: AtomicU32::new(failures),
        };
        let state = Arc::new(ClusterState::new(&config.secondaries));
        let primary = PrimaryNode::new("primary".into(), &config, Arc::clone(&state), Arc::new(transport));
        (primary, state, replica)
    }

    #[tokio::test]
    async fn test_healthy_replica_gets_single_attempt() {
        let (primary, _state, replica) = flaky_primary(2);
        let err = primary.submit(WriteRequest::new(json!("m"))).await.unwrap_err();
        assert_eq!(err.shortfall(), Some(1));
        assert!(replica.messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_suspected_replica_is_retried() {
        let (primary, state, replica) = flaky_primary(2);
        state.record_probe("secondary-1", HealthStatus::Suspected, 1).await.unwrap();

        primary.submit(WriteRequest::new(json!("m"))).await.unwrap();
        assert_eq!(replica.messages().await, vec![json!("m")]);
    }
}
