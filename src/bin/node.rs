use anyhow::Result;
use clap::Parser;
use slakv::common::ReplicationConfig;
use slakv::StorageNode;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "slakv-node")]
#[command(about = "slakv storage node - replicated shard server")]
struct Args {
    /// Node ID (must match a nodeId in the replication config)
    #[arg(short, long)]
    id: String,

    /// Replication config file (nodes and shards)
    #[arg(short, long, default_value = "replication_config.json")]
    config: PathBuf,

    /// Data directory for the HighTS snapshot
    #[arg(short, long, default_value = "./node-data")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(ReplicationConfig::from_file(&args.config)?);
    let node = StorageNode::new(config, args.id, args.data_dir)?;
    node.serve().await?;

    Ok(())
}
