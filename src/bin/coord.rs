use anyhow::Result;
use clap::Parser;
use slakv::common::ReplicationConfig;
use slakv::Coordinator;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "slakv-coord")]
#[command(about = "slakv reconfiguration coordinator")]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Replication config file (nodes and shards)
    #[arg(short, long, default_value = "replication_config.json")]
    config: PathBuf,

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
    let coordinator = Coordinator::new(config);
    coordinator.serve(&args.bind).await?;

    Ok(())
}
