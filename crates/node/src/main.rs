use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use consensus::MemoryConsensus;
use crypto::Ed25519Signer;
use tokio::signal;
use tracing::{error, info};

use node::{Node, NodeConfig, NodeRole, run_consensus_flush_task, run_discovery_loop};
use p2p::{NetworkProvider, TcpNetworkProvider};

#[derive(Parser)]
#[command(author, version, about = "Bound witness attestation node")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node with the provided configuration.
    Run(RunArgs),
    /// Generate a new signing seed.
    Keygen {
        /// Write the hex seed to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Optional path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Role to play (overrides config file).
    #[arg(long, value_enum)]
    role: Option<NodeRole>,

    /// Address to accept peers on (overrides config file).
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Peer to dial; may be repeated (overrides config file).
    #[arg(long = "seed")]
    seeds: Vec<SocketAddr>,

    /// File holding the hex signing seed (overrides config file).
    #[arg(long)]
    key_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_node(args).await?,
        Commands::Keygen { out } => {
            let seed = Ed25519Signer::generate().seed_hex();
            match out {
                Some(path) => {
                    fs::write(&path, seed.as_bytes())
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!(path = %path.display(), "signing seed written");
                }
                None => println!("{}", seed.as_str()),
            }
        }
    }
    Ok(())
}

async fn run_node(args: RunArgs) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(args.config.as_deref())?;
    if let Some(role) = args.role {
        config.role = role;
    }
    if let Some(listen) = args.listen {
        config.p2p.listen = Some(listen);
    }
    if !args.seeds.is_empty() {
        config.p2p.seeds = args.seeds;
    }
    if let Some(key_file) = args.key_file {
        config.key_file = Some(key_file);
    }

    let signer = config.load_signer()?;
    let sink = Arc::new(MemoryConsensus::new());
    let node = Node::new(&config, signer, sink.clone());
    let public_key = hex::encode(node.public_key());

    let provider: Arc<dyn NetworkProvider> = Arc::new(TcpNetworkProvider::bind(config.p2p.clone()).await?);
    let discovery_task = tokio::spawn(run_discovery_loop(node.clone(), provider.clone()));
    let flush_task = (config.role == NodeRole::Archivist).then(|| {
        tokio::spawn(run_consensus_flush_task(
            node.clone(),
            config.consensus_flush_interval,
        ))
    });

    info!(
        role = %config.role,
        key = %public_key,
        seeds = config.p2p.seeds.len(),
        "node services started"
    );

    if let Err(err) = signal::ctrl_c().await {
        error!(error = ?err, "failed to install ctrl-c handler");
    }

    info!("shutdown requested");
    provider.stop_server();
    let _ = discovery_task.await;
    if let Some(task) = flush_task {
        task.abort();
        let _ = task.await;
    }
    if config.role == NodeRole::Archivist {
        node.flush_consensus().await?;
        info!(
            witnesses = sink.witness_count(),
            blocks = sink.block_hashes().len(),
            "consensus totals"
        );
    }
    info!(height = node.height(), "node stopped");

    Ok(())
}
