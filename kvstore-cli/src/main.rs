//! `node` — the server and client entry point:
//!
//! ```text
//! node server <address> [-f config.yaml] [--store <path>]
//! node client <key> [-v value] [-f config.yaml] [--retries <n>]
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use config::ClusterConfig;
use kvstore_client::Client;
use kvstore_core::{Node, NodeHandle};
use kvstore_storage::{InMemoryStore, PersistentStore, SledStore};

/// Command-line client and server for the replicated key-value store.
#[derive(Parser)]
#[command(name = "node")]
#[command(about = "Multi-Paxos replicated key-value store: server and client")]
struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server bound to `<address>`, which must be an entry of the
    /// cluster config's `servers` list.
    Server(ServerArgs),
    /// Run one read (no `-v`) or one write (`-v` given) against the
    /// cluster, then exit.
    Client(ClientArgs),
}

#[derive(clap::Args)]
struct ServerArgs {
    /// The address to bind, matched against the cluster config's `servers`
    /// entries to determine this node's permanent id.
    address: String,

    /// Path to the cluster config YAML file.
    #[arg(short = 'f', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Optional on-disk store path; omit for the in-memory backend.
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(clap::Args)]
struct ClientArgs {
    /// The key to read or write.
    key: String,

    /// The value to write. Omit to perform a read instead.
    #[arg(short, long)]
    value: Option<String>,

    /// Path to the cluster config YAML file.
    #[arg(short = 'f', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Override the default retry bound.
    #[arg(long)]
    retries: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(format!("kvstore_cli={level},kvstore_core={level},kvstore_consensus={level}")).init();

    match cli.command {
        Commands::Server(args) => run_server(args).await,
        Commands::Client(args) => run_client(args).await,
    }
}

async fn run_server(args: ServerArgs) -> Result<()> {
    let config = ClusterConfig::load(&args.config)?;
    let id = config.node_id_of(&args.address)?;
    let peers = config.peers_excluding(id);

    let store: Arc<dyn PersistentStore> = match args.store {
        Some(path) => Arc::new(SledStore::open(&path)?),
        None => Arc::new(InMemoryStore::new()),
    };

    let node = Node::new(id, peers, store);
    let handle = NodeHandle::bind(node, &args.address).await?;
    info!(node = id, addr = args.address, "server running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    Ok(())
}

async fn run_client(args: ClientArgs) -> Result<()> {
    let config = ClusterConfig::load(&args.config)?;
    let mut client = Client::new(config.all_peers());
    if let Some(retries) = args.retries {
        client = client.with_retries(retries);
    }

    match args.value {
        Some(value) => match client.write(&args.key, &value).await {
            Ok(()) => {
                println!("OK");
                Ok(())
            }
            Err(e) => {
                error!(key = args.key, error = %e, "write failed");
                eprintln!("write failed: {e}");
                std::process::exit(1);
            }
        },
        None => match client.read(&args.key).await {
            Ok(value) => {
                println!("{value}");
                Ok(())
            }
            Err(e) => {
                error!(key = args.key, error = %e, "read failed");
                eprintln!("read failed: {e}");
                std::process::exit(1);
            }
        },
    }
}
