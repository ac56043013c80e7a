//! mongos-probe - inspect a sharded cluster from the command line
//!
//! Usage:
//!   mongos-probe mongos-1:27017 mongos-2:27017     Discover and ping routers
//!   mongos-probe --config client.json              Seed from a JSON config
//!   mongos-probe --no-discover mongos-1            Ping the seeds only
//!   mongos-probe --json mongos-1                   Print the topology as JSON
//!   mongos-probe --connect mongos-1                Also open a connection

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ouroboros_sharded::{
    ClientConfig, Connection, ConnectionFactory, ServerSnapshot, ShardedConnectionFactory,
    TcpConnectionFactory,
};

#[derive(Parser)]
#[command(name = "mongos-probe")]
#[command(about = "Discover the routers of a sharded cluster and report their latency", long_about = None)]
#[command(version)]
struct Cli {
    /// Seed router addresses (host or host:port)
    servers: Vec<String>,

    /// JSON client configuration; seeds on the command line are added to it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only ping the seeds, skip `config.mongos` discovery
    #[arg(long)]
    no_discover: bool,

    /// Print the topology as JSON
    #[arg(long)]
    json: bool,

    /// Open a connection to the best router after bootstrap
    #[arg(long)]
    connect: bool,

    /// Connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Discovery timeout per seed in milliseconds
    #[arg(long)]
    discovery_timeout_ms: Option<u64>,

    /// Ping timeout in milliseconds
    #[arg(long)]
    ping_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = build_config(&cli)?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    rt.block_on(run(cli, config))
}

fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            ClientConfig::from_json(&json)
                .with_context(|| format!("Invalid config in {}", path.display()))?
        }
        None => ClientConfig::default(),
    };

    for server in &cli.servers {
        config = config.add_server(server.as_str());
    }
    if config.servers.is_empty() {
        bail!("No seed servers given; pass addresses or --config");
    }
    if cli.no_discover {
        config = config.auto_discover_servers(false);
    }
    if let Some(ms) = cli.connect_timeout_ms {
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.discovery_timeout_ms {
        config = config.with_discovery_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.ping_timeout_ms {
        config = config.with_ping_timeout(Duration::from_millis(ms));
    }
    // One sweep is enough for a report
    config = config.with_ping_interval(Duration::ZERO);

    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli, config: ClientConfig) -> Result<()> {
    let tcp = Arc::new(TcpConnectionFactory::new(config.clone()));
    let factory = ShardedConnectionFactory::new(tcp, config).await;
    let snapshots = factory.cluster().snapshots();

    let connected = if cli.connect {
        match factory.connect().await {
            Ok(conn) => {
                let address = conn.server_address().to_string();
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "Error closing probe connection");
                }
                Some(Ok(address))
            }
            Err(e) => Some(Err(e)),
        }
    } else {
        None
    };
    factory.close().await;

    if cli.json {
        let mut report = serde_json::json!({ "servers": snapshots });
        if let Some(outcome) = &connected {
            report["connected"] = match outcome {
                Ok(address) => serde_json::json!({ "address": address }),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&snapshots);
        match &connected {
            Some(Ok(address)) => println!("\nConnected to {}", address),
            Some(Err(e)) => println!("\nConnect failed: {}", e),
            None => {}
        }
    }

    if let Some(Err(e)) = connected {
        bail!("Could not connect: {}", e);
    }
    Ok(())
}

fn print_table(snapshots: &[ServerSnapshot]) {
    let width = snapshots
        .iter()
        .map(|s| s.address.len())
        .max()
        .unwrap_or(0)
        .max("ADDRESS".len());

    println!("{:<width$}  {:<11}  {:>10}  TAGS", "ADDRESS", "STATUS", "LATENCY");
    for snapshot in snapshots {
        let latency = snapshot
            .average_latency_ms
            .map(|ms| format!("{:.2}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let tags: Vec<&str> = snapshot.tags.iter().map(String::as_str).collect();
        println!(
            "{:<width$}  {:<11}  {:>10}  {}",
            snapshot.address,
            snapshot.status.to_string(),
            latency,
            tags.join(",")
        );
    }
}

fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok(); // Ignore error if already initialized

    Ok(())
}
