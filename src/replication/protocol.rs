//! Replication Protocol
//!
//! Defines the JSON messages exchanged between clients, the primary and
//! the secondaries.

use std::collections::HashMap;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sequence id assigned by the primary
pub type SequenceId = u64;

/// Opaque message payload
pub type Payload = serde_json::Value;

/// Per-replica fault injection carried by a client write
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaultInjection {
    /// Seconds the replica sleeps before applying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,

    /// Replica fails the call without applying
    #[serde(default)]
    pub noreply: bool,
}

impl FaultInjection {
    /// Delay as a Duration; zero, negative and non-finite values mean no delay
    pub fn delay(&self) -> Option<Duration> {
        self.delay
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .filter(|d| !d.is_zero())
    }
}

/// Client write accepted by the primary
///
/// Besides `message` and `w`, any top-level key naming a replica carries
/// that replica's fault injection, e.g. `"secondary-1": {"delay": 2}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Payload to replicate
    pub message: Payload,

    /// Write concern (nodes, primary included); defaults to all nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<i64>,

    /// Remaining keys, looked up by replica name
    #[serde(flatten)]
    pub replicas: HashMap<String, serde_json::Value>,
}

impl WriteRequest {
    /// Create a write with default write concern and no fault injection
    pub fn new(message: Payload) -> Self {
        Self {
            message,
            w: None,
            replicas: HashMap::new(),
        }
    }

    /// Set the write concern
    pub fn with_write_concern(mut self, w: i64) -> Self {
        self.w = Some(w);
        self
    }

    /// Attach fault injection for one replica
    pub fn with_faults(mut self, replica: &str, faults: FaultInjection) -> Self {
        // FaultInjection only holds plain numbers and booleans.
        let value = serde_json::to_value(faults).unwrap_or(serde_json::Value::Null);
        self.replicas.insert(replica.to_string(), value);
        self
    }

    /// Fault injection requested for `replica`, or none
    pub fn faults_for(&self, replica: &str) -> Result<FaultInjection> {
        match self.replicas.get(replica) {
            None | Some(serde_json::Value::Null) => Ok(FaultInjection::default()),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                Error::InvalidRequest(format!("invalid options for {}: {}", replica, e))
            }),
        }
    }
}

/// Write sent from the primary to a secondary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateRequest {
    /// Payload to apply
    pub message: Payload,

    /// Sequence id assigned by the primary
    pub id: SequenceId,

    /// Seconds to sleep before applying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,

    /// Fail without applying
    #[serde(default)]
    pub noreply: bool,
}

impl ReplicateRequest {
    pub fn new(message: Payload, id: SequenceId, faults: FaultInjection) -> Self {
        Self {
            message,
            id,
            delay: faults.delay,
            noreply: faults.noreply,
        }
    }

    pub fn faults(&self) -> FaultInjection {
        FaultInjection {
            delay: self.delay,
            noreply: self.noreply,
        }
    }
}

/// Flush sent from the primary to a secondary
///
/// Ids keep increasing across flushes; the replica restarts its log at
/// `next_id` so writes assigned before the flush are ignored on arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlushRequest {
    #[serde(default)]
    pub next_id: SequenceId,
}

/// Result of a write accepted by the primary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Sequence id assigned to the write
    pub id: SequenceId,

    /// The replicated payload
    pub message: Payload,
}
