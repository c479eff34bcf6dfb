//! WolfLog - Replicated Message Log
//!
//! Runs a primary that replicates client writes to its secondaries under
//! a configurable write concern, or a secondary that applies them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolflog::api::HttpServer;
use wolflog::config::{NodeRole, WolfLogConfig};
use wolflog::error::{Error, Result};
use wolflog::network::HttpTransport;
use wolflog::replication::{PrimaryNode, SecondaryNode};
use wolflog::state::{ClusterState, HealthMonitor, QuorumMonitor};

/// WolfLog - Replicated Message Log
#[derive(Parser)]
#[command(name = "wolflog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolflog.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to the config value
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    Primary,
    Secondary,
}

impl From<RoleArg> for NodeRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Primary => NodeRole::Primary,
            RoleArg::Secondary => NodeRole::Secondary,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the node
    Start {
        /// Role to run when no configuration file exists
        #[arg(long, value_enum)]
        role: Option<RoleArg>,

        /// Node ID to use when no configuration file exists
        #[arg(long)]
        node_id: Option<String>,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolflog.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "primary")]
        node_id: String,

        /// Node role
        #[arg(long, value_enum, default_value = "primary")]
        role: RoleArg,
    },

    /// Validate configuration file
    Validate,

    /// Show node information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { role, node_id } => {
            run_start(&cli.config, cli.log_level, role, node_id).await
        }
        Commands::Init { output, node_id, role } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_init(output, node_id, role.into())
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_validate(&cli.config)
        }
        Commands::Info => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_info(&cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the configuration file, or build one from `--role` when it is absent
fn load_config(
    config_path: &Path,
    role: Option<RoleArg>,
    node_id: Option<String>,
) -> Result<WolfLogConfig> {
    if config_path.exists() {
        return WolfLogConfig::from_file(config_path);
    }

    let role: NodeRole = role
        .ok_or_else(|| {
            Error::Config(format!(
                "{} not found; pass --role to start from environment variables",
                config_path.display()
            ))
        })?
        .into();
    let node_id = node_id.unwrap_or_else(|| role.to_string().to_lowercase());

    let mut config = WolfLogConfig::sample(&node_id, role);
    config.cluster.secondaries.clear();
    Ok(config)
}

/// Start the node
async fn run_start(
    config_path: &Path,
    log_level: Option<String>,
    role: Option<RoleArg>,
    node_id: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path, role, node_id)?;
    config.apply_env()?;

    init_logging(log_level.as_deref().unwrap_or(&config.logging.level));
    tracing::info!("Starting WolfLog node {} as {}", config.node.id, config.node.role);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_server = match config.node.role {
        NodeRole::Primary => {
            let cluster = Arc::new(ClusterState::new(&config.cluster.secondaries));
            let transport = Arc::new(HttpTransport::from_config(&config.cluster)?);

            let health = Arc::new(HealthMonitor::new(
                &config.cluster,
                Arc::clone(&cluster),
                transport.clone(),
            ));
            let quorum = Arc::new(QuorumMonitor::new(
                Arc::clone(&cluster),
                config.cluster.quorum_interval(),
            ));
            tokio::spawn(health.run(shutdown_rx.clone()));
            tokio::spawn(quorum.run(shutdown_rx.clone()));

            for secondary in &config.cluster.secondaries {
                tracing::info!("Replicating to {} at {}", secondary.name, secondary.address);
            }

            let primary = Arc::new(PrimaryNode::new(
                config.node.id.clone(),
                &config.cluster,
                cluster,
                transport,
            ));
            HttpServer::primary(config.api.clone(), primary)
        }
        NodeRole::Secondary => {
            let secondary = Arc::new(SecondaryNode::new(config.node.id.clone()));
            HttpServer::secondary(config.api.clone(), secondary)
        }
    };

    let mut server = tokio::spawn(async move { http_server.start(shutdown_rx).await });

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(result) => result,
                Err(e) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
            };
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    match server.await {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
    }
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, node_id: String, role: NodeRole) -> Result<()> {
    let config = WolfLogConfig::sample(&node_id, role);
    std::fs::write(&output, config.to_toml()?)?;

    println!("Configuration file created: {}", output.display());
    println!("Then start with: wolflog start --config {}", output.display());
    Ok(())
}

/// Validate configuration
fn run_validate(config_path: &Path) -> Result<()> {
    match WolfLogConfig::from_file(config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Node ID: {}", config.node.id);
            println!("  Role: {}", config.node.role);
            println!("  Bind Address: {}", config.api.bind_address);
            if config.node.role == NodeRole::Primary {
                println!("  Secondaries: {}", config.cluster.secondaries.len());
                println!("  Quorum Size: {}", config.cluster.quorum_size());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show node information
fn run_info(config_path: &Path) -> Result<()> {
    let config = WolfLogConfig::from_file(config_path)?;

    println!("WolfLog Node Information");
    println!("========================");
    println!();
    println!("Node ID:          {}", config.node.id);
    println!("Role:             {}", config.node.role);
    println!("Bind Address:     {}", config.api.bind_address);
    println!("Log Level:        {}", config.logging.level);

    if config.node.role == NodeRole::Primary {
        let cluster = &config.cluster;
        println!();
        println!("Cluster Configuration:");
        println!("  Nodes:          {}", cluster.total_nodes());
        println!("  Quorum Size:    {}", cluster.quorum_size());
        println!("  Heartbeats:     {} every {} ms", cluster.heartbeats_number, cluster.heartbeat_interval_ms);
        println!("  Quorum Check:   {} ms", cluster.quorum_interval_ms);
        println!("  Retry:          {} attempts, {}-{} ms", cluster.retry.max_attempts, cluster.retry.base_delay_ms, cluster.retry.max_delay_ms);
        println!();
        println!("Secondaries:");
        for secondary in &cluster.secondaries {
            println!("  {:<15} {}", secondary.name, secondary.address);
        }
    }

    Ok(())
}
