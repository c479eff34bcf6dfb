//! Network Client
//!
//! HTTP transport to secondaries over reqwest.

use std::time::Duration;

use super::ReplicaTransport;
use crate::config::{ClusterConfig, SecondaryConfig};
use crate::error::{Error, Result};
use crate::replication::{FlushRequest, ReplicateRequest, SequenceId};

/// HTTP client for replica calls
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Timeout for a single liveness probe
    probe_timeout: Duration,
    /// Timeout for a single replicated write
    replication_timeout: Duration,
}

impl HttpTransport {
    /// Create a new transport
    pub fn new(probe_timeout: Duration, replication_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            probe_timeout,
            replication_timeout,
        })
    }

    pub fn from_config(config: &ClusterConfig) -> Result<Self> {
        Self::new(config.probe_timeout(), config.replication_timeout())
    }

    fn url(replica: &SecondaryConfig, path: &str) -> String {
        format!("{}{}", replica.address.trim_end_matches('/'), path)
    }

    /// Turn a response into Ok for 2xx, ReplicaRejected otherwise
    fn check_status(replica: &SecondaryConfig, response: &reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::ReplicaRejected {
                replica: replica.name.clone(),
                status: status.as_u16(),
            })
        }
    }
}

/// Map a reqwest failure onto the transport error variants
fn map_send_error(replica: &SecondaryConfig, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::ConnectionTimeout(replica.name.clone())
    } else if e.is_connect() {
        Error::ConnectionFailed {
            address: replica.address.clone(),
            reason: e.to_string(),
        }
    } else {
        Error::Network(format!("{}: {}", replica.name, e))
    }
}

#[async_trait::async_trait]
impl ReplicaTransport for HttpTransport {
    async fn replicate(&self, replica: &SecondaryConfig, request: &ReplicateRequest) -> Result<()> {
        let response = self
            .client
            .post(Self::url(replica, "/messages"))
            .json(request)
            .timeout(self.replication_timeout)
            .send()
            .await
            .map_err(|e| map_send_error(replica, e))?;

        Self::check_status(replica, &response)
    }

    async fn ping(&self, replica: &SecondaryConfig) -> Result<()> {
        let response = self
            .client
            .get(Self::url(replica, "/ping"))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| map_send_error(replica, e))?;

        // Probes need exactly 200, any other 2xx is still a miss.
        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::ReplicaRejected {
                replica: replica.name.clone(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn flush(&self, replica: &SecondaryConfig, next_id: SequenceId) -> Result<()> {
        let response = self
            .client
            .post(Self::url(replica, "/flush"))
            .json(&FlushRequest { next_id })
            .timeout(self.replication_timeout)
            .send()
            .await
            .map_err(|e| map_send_error(replica, e))?;

        Self::check_status(replica, &response)
    }
}
