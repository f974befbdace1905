use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use slakv::client::{ClientContext, ServerSelectionPolicy};
use slakv::common::{ReplicationConfig, Sla};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "slakv")]
#[command(about = "slakv client - SLA-aware reads and writes")]
struct Args {
    /// Replication config file (nodes and shards)
    #[arg(short, long, default_value = "replication_config.json")]
    config: PathBuf,

    /// SLA file for reads
    #[arg(short, long)]
    sla: Option<PathBuf>,

    /// Server selection policy: pileus, random, primary, closest
    #[arg(short, long, default_value = "pileus")]
    policy: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write a value through the shard primary
    Put { key: String, value: String },
    /// SLA-aware read
    Get { key: String },
    /// Warm RTT windows against every node
    Probe {
        #[arg(default_value_t = 5)]
        count: u32,
    },
    /// Write `count` random keys with generated values
    Seed {
        #[arg(default_value_t = 20)]
        count: u32,
        /// Upper bound (exclusive) for generated numeric keys
        #[arg(long, default_value_t = 6000)]
        key_space: i64,
    },
}

fn parse_policy(s: &str) -> Result<ServerSelectionPolicy> {
    match s.to_ascii_lowercase().as_str() {
        "pileus" => Ok(ServerSelectionPolicy::Pileus),
        "random" => Ok(ServerSelectionPolicy::Random),
        "primary" => Ok(ServerSelectionPolicy::Primary),
        "closest" => Ok(ServerSelectionPolicy::Closest),
        other => anyhow::bail!("unknown policy: {}", other),
    }
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
    let ctx = ClientContext::new(config)?;
    let policy = parse_policy(&args.policy)?;

    let sla = match &args.sla {
        Some(path) => Sla::from_file(path, "cli")?,
        // A permissive default: any replica, one second.
        None => Sla::from_json(
            r#"{"subSLAs": [{"rank": 1, "consistency": "eventual", "latency_bound": 1000, "utility": 1.0}]}"#,
            "cli-default",
        )?,
    };
    let mut session = ctx.begin_session(sla, policy);

    match args.command {
        Command::Put { key, value } => {
            let ts = ctx.put(&mut session, &key, &value).await?;
            println!("put {} @ {}", key, ts);
        }
        Command::Get { key } => {
            ctx.send_probes(5).await;
            let outcome = ctx
                .get(&mut session, &key, None)
                .await
                .with_context(|| format!("get {} failed", key))?;
            match &outcome.sub_achieved {
                Some(sub) => println!(
                    "{} = {} (ts {}, {:?} met, utility {})",
                    key, outcome.value, outcome.timestamp, sub.consistency, outcome.utility
                ),
                None => println!(
                    "{} = {} (ts {}, SLA miss)",
                    key, outcome.value, outcome.timestamp
                ),
            }
        }
        Command::Probe { count } => {
            ctx.send_probes(count).await;
            for node in &ctx.config().nodes {
                println!("{}: avg rtt {:?}", node.id, ctx.monitor.avg_rtt(&node.address));
            }
        }
        Command::Seed { count, key_space } => {
            let mut rng = rand::thread_rng();
            for _ in 0..count {
                let key = format!("{:04}", rng.gen_range(0..key_space));
                let value = Uuid::new_v4().to_string();
                let ts = ctx.put(&mut session, &key, &value).await?;
                println!("put {} @ {}", key, ts);
            }
        }
    }

    let summary = ctx.end_session(&mut session);
    if summary.reads > 0 {
        println!("avg utility: {:.4}", summary.avg_utility);
    }

    Ok(())
}
