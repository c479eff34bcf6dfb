//! WolfLogCtl - Command line client for WolfLog clusters
//!
//! Usage:
//!   wolflogctl post hello --w 2       - Replicate a message
//!   wolflogctl list                   - Show the node's log
//!   wolflogctl health                 - Show replica health (primary)
//!   wolflogctl status                 - Show node status

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// WolfLog Cluster Control Tool
#[derive(Parser)]
#[command(name = "wolflogctl")]
#[command(about = "Write to and inspect WolfLog clusters", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "wolflog.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the node answers
    Ping,
    /// Replicate a message through the primary
    Post {
        /// Message; parsed as JSON when possible, a random UUID if omitted
        message: Option<String>,
        /// Write concern, primary included
        #[arg(long)]
        w: Option<i64>,
        /// Delay a replica, as name=seconds (repeatable)
        #[arg(long, value_parser = parse_delay)]
        delay: Vec<(String, f64)>,
        /// Make a replica fail the write (repeatable)
        #[arg(long)]
        noreply: Vec<String>,
    },
    /// Show the node's log
    List,
    /// Show replica health
    Health,
    /// Show node status
    Status,
    /// Clear the log (the primary forwards this to its replicas)
    Flush,
}

fn parse_delay(s: &str) -> Result<(String, f64), String> {
    let (name, secs) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=seconds, got {:?}", s))?;
    let secs: f64 = secs
        .parse()
        .map_err(|_| format!("invalid delay for {}: {:?}", name, secs))?;
    Ok((name.to_string(), secs))
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
    #[serde(default)]
    shortfall: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ReplicaRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    positive_probes: u32,
    #[serde(default)]
    since: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    has_quorum: Option<bool>,
    #[serde(default)]
    log_length: usize,
    #[serde(default)]
    staged: Option<usize>,
    #[serde(default)]
    replicas: Vec<ReplicaRecord>,
}

// ============ Config File Types ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default)]
    bind_address: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let endpoint = match &cli.endpoint {
        Some(e) => e.trim_end_matches('/').to_string(),
        None => endpoint_from_config(&cli.config),
    };

    let result = match &cli.command {
        Commands::Ping => ping(&endpoint).await,
        Commands::Post { message, w, delay, noreply } => {
            post(&endpoint, message.as_deref(), *w, delay, noreply).await
        }
        Commands::List => list(&endpoint).await,
        Commands::Health => health(&endpoint).await,
        Commands::Status => show_status(&endpoint).await,
        Commands::Flush => flush(&endpoint).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Derive the endpoint from the node's config file, if there is one
fn endpoint_from_config(path: &Path) -> String {
    let default = "http://127.0.0.1:8080".to_string();
    let Ok(content) = std::fs::read_to_string(path) else {
        return default;
    };
    let Ok(config) = toml::from_str::<Config>(&content) else {
        return default;
    };

    let addr = config.api.bind_address;
    if addr.is_empty() {
        default
    } else if addr.starts_with("0.0.0.0") {
        format!("http://127.0.0.1:{}", addr.split(':').nth(1).unwrap_or("8080"))
    } else {
        format!("http://{}", addr)
    }
}

/// Turn an error response into a readable message
async fn api_error(response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    match response.json::<ErrorResponse>().await {
        Ok(body) => match body.shortfall {
            Some(shortfall) => anyhow!(
                "{} ({}, {} acknowledgment(s) missing): {}",
                status,
                body.code,
                shortfall,
                body.error
            ),
            None => anyhow!("{} ({}): {}", status, body.code, body.error),
        },
        Err(_) => anyhow!("API error: {}", status),
    }
}

// ============ Commands ============

async fn ping(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/ping", endpoint);
    let response = reqwest::Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    println!("{}", response.text().await?);
    Ok(())
}

async fn post(
    endpoint: &str,
    message: Option<&str>,
    w: Option<i64>,
    delays: &[(String, f64)],
    noreply: &[String],
) -> anyhow::Result<()> {
    let message = match message {
        Some(m) => serde_json::from_str(m).unwrap_or_else(|_| serde_json::Value::String(m.to_string())),
        None => serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
    };

    let mut body = serde_json::Map::new();
    body.insert("message".into(), message);
    if let Some(w) = w {
        body.insert("w".into(), w.into());
    }

    let mut faults: BTreeMap<String, serde_json::Map<String, serde_json::Value>> = BTreeMap::new();
    for (name, secs) in delays {
        faults.entry(name.clone()).or_default().insert("delay".into(), (*secs).into());
    }
    for name in noreply {
        faults.entry(name.clone()).or_default().insert("noreply".into(), true.into());
    }
    for (name, options) in faults {
        body.insert(name, serde_json::Value::Object(options));
    }

    let url = format!("{}/messages", endpoint);
    let started = std::time::Instant::now();
    let response = reqwest::Client::new().post(&url).json(&body).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let payload: serde_json::Value = response.json().await?;
    println!("✓ Replicated in {:?}: {}", started.elapsed(), payload);
    Ok(())
}

async fn list(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/messages", endpoint);
    let response = reqwest::Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let messages: Vec<serde_json::Value> = response.json().await?;
    println!("{} message(s)", messages.len());
    for (id, message) in messages.iter().enumerate() {
        println!("{:>6}  {}", id, message);
    }
    Ok(())
}

async fn health(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/health", endpoint);
    let response = reqwest::Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let health: BTreeMap<String, String> = response.json().await?;
    println!("{:<20} {:<10}", "REPLICA", "HEALTH");
    println!("{}", "-".repeat(30));
    for (name, status) in health {
        println!("{:<20} {:<10}", name, status);
    }
    Ok(())
}

async fn show_status(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/status", endpoint);
    let response = reqwest::Client::new().get(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let status: StatusResponse = response.json().await?;

    println!();
    println!("WolfLog Node Status (wolflogctl v{})", env!("CARGO_PKG_VERSION"));
    println!("======================================");
    println!();
    println!("Node ID:     {}", status.node_id);
    println!("Role:        {}", status.role);
    println!("Log Length:  {}", status.log_length);
    if let Some(has_quorum) = status.has_quorum {
        println!("Quorum:      {}", if has_quorum { "yes" } else { "NO" });
    }
    if let Some(staged) = status.staged {
        println!("Staged:      {}", staged);
    }

    if !status.replicas.is_empty() {
        println!();
        println!("{:<15} {:<30} {:<10} {:<7} {}", "REPLICA", "ADDRESS", "HEALTH", "PROBES", "SINCE");
        println!("{}", "-".repeat(90));
        for replica in &status.replicas {
            println!(
                "{:<15} {:<30} {:<10} {:<7} {}",
                replica.name, replica.address, replica.status, replica.positive_probes, replica.since
            );
        }
    }
    println!();
    Ok(())
}

async fn flush(endpoint: &str) -> anyhow::Result<()> {
    let url = format!("{}/flush", endpoint);
    let response = reqwest::Client::new().post(&url).send().await?;

    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    println!("✓ Log flushed");
    Ok(())
}
