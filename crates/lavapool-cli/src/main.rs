//! lavapool CLI - inspect an audio node pool from the command line
//!
//! Connects to the nodes in a client configuration file and reports their
//! state and load, or shows where a new session would be placed.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use lavapool_client::{simplify_region, ClientConfig, NodeState, Registry};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// lavapool - audio node pool client
#[derive(Parser)]
#[command(name = "lavapool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "LAVAPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every configured node and report state and load
    Probe {
        /// Seconds between reports
        #[arg(short, long, default_value = "5")]
        interval: u64,
    },

    /// Show which node a new session would be placed on
    Select {
        /// Guild voice region, e.g. vip-us-east
        #[arg(short, long)]
        region: Option<String>,

        /// Seconds to wait for nodes to connect
        #[arg(short, long, default_value = "10")]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.log_level, cli.json_logs)?;

    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Probe { interval } => probe(config, interval).await,
        Commands::Select { region, wait } => select(config, region.as_deref(), wait).await,
    }
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lavapool").join("config.toml"))
}

fn load_config(path: Option<PathBuf>) -> Result<ClientConfig> {
    let path = match path.or_else(default_config_path) {
        Some(path) => path,
        None => bail!("No config path given and no config directory on this platform"),
    };

    let config = ClientConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    info!("Loaded {} nodes from {}", config.nodes.len(), path.display());
    Ok(config)
}

async fn probe(config: ClientConfig, interval: u64) -> Result<()> {
    let registry = Registry::from_config(config).context("Failed to start node pool")?;

    println!(
        "{} Probing {} nodes (Ctrl+C to stop)",
        "lavapool".cyan().bold(),
        registry.nodes().len()
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => print_nodes(&registry),
        }
    }

    registry.shutdown().await;
    Ok(())
}

async fn select(config: ClientConfig, region: Option<&str>, wait: u64) -> Result<()> {
    let registry = Registry::from_config(config).context("Failed to start node pool")?;

    if !registry.wait_for_nodes(Duration::from_secs(wait)).await {
        registry.shutdown().await;
        bail!("No node connected within {}s", wait);
    }

    let chosen = registry.select_node(region);
    print_nodes(&registry);

    match chosen {
        Ok(node) => {
            let target = region
                .map(|r| format!("region {} ({})", r, simplify_region(r)))
                .unwrap_or_else(|| "no region".to_string());
            println!(
                "{} {} -> {}",
                "selected".green().bold(),
                target,
                node.id().bold()
            );
        }
        Err(e) => println!("{} {}", "no node".red().bold(), e),
    }

    registry.shutdown().await;
    Ok(())
}

fn print_nodes(registry: &Registry) {
    println!(
        "{:<28} {:<10} {:<13} {:>5} {:>8} {:>8} {:>8}",
        "NODE".bold(),
        "REGION".bold(),
        "STATE".bold(),
        "CORES".bold(),
        "LOAD".bold(),
        "SCORE".bold(),
        "PLAYERS".bold()
    );
    for node in registry.nodes() {
        let state = format!("{:?}", node.state());
        let state = match node.state() {
            NodeState::Connected => state.green(),
            NodeState::Connecting => state.yellow(),
            NodeState::Disconnected => state.red(),
        };
        let stats = node.stats();
        println!(
            "{:<28} {:<10} {:<13} {:>5} {:>8.2} {:>8.1} {:>8}",
            node.id(),
            node.region(),
            state,
            stats.cores,
            stats.load,
            stats.score(),
            node.players().len()
        );
    }
}
