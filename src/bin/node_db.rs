use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, info};

use leasekv::config::ClusterConfig;
use leasekv::error::Result;
use leasekv::server::Server;

/// Runs a single leasekv cluster node.
#[derive(Parser)]
#[command(name = "node_db")]
struct Args {
    /// This node's id in the cluster file.
    #[arg(long)]
    id: u64,

    /// Recover persisted state instead of starting fresh.
    #[arg(long)]
    restarting: bool,

    /// Path to the cluster file.
    #[arg(long, default_value = "config/cluster.yaml")]
    config: String,

    /// Directory for this node's persistent files. Defaults to data/node-<id>.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("fatal: {}", err);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = ClusterConfig::load(&args.config)?;
    let data_dir =
        args.data_dir.unwrap_or_else(|| PathBuf::from(format!("data/node-{}", args.id)));
    let server = Server::start(args.id, args.restarting, &config, &data_dir).await?;

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
    }
}
