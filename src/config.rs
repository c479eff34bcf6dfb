//! WolfLog Configuration
//!
//! This module provides configuration structures for WolfLog nodes.
//! Configuration is read from a TOML file and may be overridden by the
//! environment variables used by container deployments.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main WolfLog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfLogConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Cluster configuration (only read by the primary)
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes and replicates them
    Primary,
    /// Applies replicated writes
    Secondary,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Primary => write!(f, "PRIMARY"),
            NodeRole::Secondary => write!(f, "SECONDARY"),
        }
    }
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: String,

    /// Node role
    pub role: NodeRole,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,

    /// Enable CORS
    #[serde(default)]
    pub cors_enabled: bool,
}

/// A replica the primary replicates to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryConfig {
    /// Name used in write requests and health reports
    pub name: String,

    /// Base URL of the replica API (e.g. `http://secondary-1:8081`)
    pub address: String,
}

/// Retry policy for replicas that are not known to be healthy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single retry delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Liveness probes sent to each replica per health cycle
    #[serde(default = "default_heartbeats_number")]
    pub heartbeats_number: u32,

    /// Sleep between health cycles in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Sleep between quorum checks in milliseconds
    #[serde(default = "default_quorum_interval_ms")]
    pub quorum_interval_ms: u64,

    /// Timeout of a single liveness probe in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout of a single replication call in milliseconds
    #[serde(default = "default_replication_timeout_ms")]
    pub replication_timeout_ms: u64,

    /// Retry policy for suspected/unhealthy replicas
    #[serde(default)]
    pub retry: RetryConfig,

    /// Replicas, in order
    #[serde(default)]
    pub secondaries: Vec<SecondaryConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_api_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_heartbeats_number() -> u32 {
    3
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_quorum_interval_ms() -> u64 {
    1000
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_replication_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_api_address(),
            cors_enabled: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeats_number: default_heartbeats_number(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            quorum_interval_ms: default_quorum_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            replication_timeout_ms: default_replication_timeout_ms(),
            retry: RetryConfig::default(),
            secondaries: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl ClusterConfig {
    /// Get heartbeat interval as Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Get quorum check interval as Duration
    pub fn quorum_interval(&self) -> Duration {
        Duration::from_millis(self.quorum_interval_ms)
    }

    /// Get probe timeout as Duration
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Get replication call timeout as Duration
    pub fn replication_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_timeout_ms)
    }

    /// Total number of nodes, primary included
    pub fn total_nodes(&self) -> usize {
        self.secondaries.len() + 1
    }

    /// Calculate quorum size (strict majority of all nodes)
    pub fn quorum_size(&self) -> usize {
        (self.total_nodes() / 2) + 1
    }
}

impl WolfLogConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfLogConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> crate::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source, then re-validate.
    ///
    /// Recognised variables: `PORT`, `SECONDARIES_NUMBER`,
    /// `SECONDARY_<i>_HOST`, `SECONDARY_<i>_PORT`, `HEARTBEATS_NUMBER`,
    /// `HEARTBEATS_INTERVAL` and `QUORUM_INTERVAL` (both in seconds).
    pub fn apply_overrides<F>(&mut self, var: F) -> crate::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT") {
            let port: u16 = parse_var("PORT", &port)?;
            self.api.bind_address = format!("0.0.0.0:{}", port);
        }

        if let Some(count) = var("SECONDARIES_NUMBER") {
            let count: usize = parse_var("SECONDARIES_NUMBER", &count)?;
            let mut secondaries = Vec::with_capacity(count);
            for i in 1..=count {
                let name = format!("secondary-{}", i);
                let host = var(&format!("SECONDARY_{}_HOST", i)).unwrap_or_else(|| name.clone());
                let port_key = format!("SECONDARY_{}_PORT", i);
                let port = var(&port_key)
                    .ok_or_else(|| crate::Error::Config(format!("{} must be set", port_key)))?;
                let port: u16 = parse_var(&port_key, &port)?;
                secondaries.push(SecondaryConfig {
                    name,
                    address: format!("http://{}:{}", host, port),
                });
            }
            self.cluster.secondaries = secondaries;
        }

        if let Some(n) = var("HEARTBEATS_NUMBER") {
            self.cluster.heartbeats_number = parse_var("HEARTBEATS_NUMBER", &n)?;
        }

        if let Some(secs) = var("HEARTBEATS_INTERVAL") {
            self.cluster.heartbeat_interval_ms = parse_secs_as_ms("HEARTBEATS_INTERVAL", &secs)?;
        }

        if let Some(secs) = var("QUORUM_INTERVAL") {
            self.cluster.quorum_interval_ms = parse_secs_as_ms("QUORUM_INTERVAL", &secs)?;
        }

        self.validate()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.id.is_empty() {
            return Err(crate::Error::Config("node.id cannot be empty".into()));
        }

        if self.api.bind_address.is_empty() {
            return Err(crate::Error::Config("api.bind_address cannot be empty".into()));
        }

        if self.node.role == NodeRole::Secondary {
            return Ok(());
        }

        let cluster = &self.cluster;
        if cluster.heartbeats_number == 0 {
            return Err(crate::Error::Config("cluster.heartbeats_number must be at least 1".into()));
        }

        if cluster.heartbeat_interval_ms == 0 || cluster.quorum_interval_ms == 0 {
            return Err(crate::Error::Config("cluster intervals must be non-zero".into()));
        }

        if cluster.retry.max_attempts == 0 {
            return Err(crate::Error::Config("cluster.retry.max_attempts must be at least 1".into()));
        }

        let mut names = std::collections::HashSet::new();
        for secondary in &cluster.secondaries {
            if secondary.name.is_empty() || secondary.address.is_empty() {
                return Err(crate::Error::Config("secondary name and address cannot be empty".into()));
            }
            if !names.insert(secondary.name.as_str()) {
                return Err(crate::Error::Config(format!("duplicate secondary name: {}", secondary.name)));
            }
        }

        Ok(())
    }

    /// Sample configuration written by `wolflog init`
    pub fn sample(node_id: &str, role: NodeRole) -> Self {
        let cluster = match role {
            NodeRole::Primary => ClusterConfig {
                secondaries: (1..=2)
                    .map(|i| SecondaryConfig {
                        name: format!("secondary-{}", i),
                        address: format!("http://secondary-{}:{}", i, 8080 + i),
                    })
                    .collect(),
                ..ClusterConfig::default()
            },
            NodeRole::Secondary => ClusterConfig::default(),
        };

        Self {
            node: NodeConfig {
                id: node_id.to_string(),
                role,
            },
            api: ApiConfig::default(),
            cluster,
            logging: LoggingConfig::default(),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> crate::Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| crate::Error::Config(format!("invalid value for {}: {:?}", key, value)))
}

fn parse_secs_as_ms(key: &str, value: &str) -> crate::Result<u64> {
    let secs: f64 = parse_var(key, value)?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(crate::Error::Config(format!("invalid value for {}: {:?}", key, value)));
    }
    Ok((secs * 1000.0).round() as u64)
}
