//! Ripple - cluster-wide bucket event notification
//!
//! Runs one node of a Ripple cluster: the object/bucket HTTP surface, the
//! notification registry and the peer endpoint.

use clap::{Parser, Subcommand};
use ripple_api::RippleServer;
use ripple_core::config::{parse_peer_list, LoggingConfig, RippleConfig};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ripple")]
#[command(author = "Ripple Team")]
#[command(version = ripple_core::VERSION)]
#[command(about = "Cluster-wide bucket event notification", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Bind address
    #[arg(long, env = "RIPPLE_BIND_ADDRESS")]
    bind: Option<String>,

    /// Port number
    #[arg(short, long, env = "RIPPLE_PORT")]
    port: Option<u16>,

    /// Data directory
    #[arg(long, env = "RIPPLE_DATA_DIR")]
    data_dir: Option<String>,

    /// Identifier of this node within the cluster
    #[arg(long, env = "RIPPLE_NODE_ID")]
    node_id: Option<String>,

    /// Cluster peers as `id=http://host:port`, comma separated
    #[arg(long, env = "RIPPLE_PEERS")]
    peers: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RIPPLE_LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a Ripple node
    Server,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RippleConfig::from_file(path)?,
        None => RippleConfig::from_env(),
    };

    // Override with CLI args
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir.into();
    }
    if let Some(node_id) = cli.node_id {
        config.cluster.node_id = Some(node_id);
    }
    if let Some(peers) = cli.peers {
        config.cluster.peers = parse_peer_list(&peers);
        config.cluster.enabled = !config.cluster.peers.is_empty();
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging);

    match cli.command {
        Some(Commands::Version) => print_banner(),
        Some(Commands::Server) | None => {
            print_banner();
            run_server(config).await?;
        }
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

fn print_banner() {
    println!(
        r#"
    ____  _             __
   / __ \(_)___  ____  / /__
  / /_/ / / __ \/ __ \/ / _ \
 / _, _/ / /_/ / /_/ / /  __/
/_/ |_/_/ .___/ .___/_/\___/
       /_/   /_/

   Cluster-wide bucket event notification
   Version: {}
"#,
        ripple_core::VERSION
    );
}

async fn run_server(config: RippleConfig) -> anyhow::Result<()> {
    info!("Starting Ripple node {}...", config.node_address());
    info!("Data directory: {:?}", config.storage.data_dir);
    if config.is_multi_node() {
        info!("Peers: {}", config.cluster.peers.len());
    }

    RippleServer::new(config).run().await?;

    Ok(())
}
