//! Storage-node assembly
//!
//! Wires the versioned store, per-shard state, HTTP router, and pull
//! loops together. HighTS is seeded from the on-disk snapshot before
//! the listener opens and written back on SIGINT/SIGTERM, so a
//! restarted secondary resumes replication from its last known point
//! instead of refetching the whole history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{Error, ReplicationConfig, Result};
use crate::node::http::{create_router, NodeState};
use crate::node::replication::spawn_pull_loops;
use crate::node::shard::{
    load_high_ts_snapshot, save_high_ts_snapshot, ShardRole, ShardState, TimestampOracle,
};
use crate::node::store::MemStore;

/// File name of the persisted HighTS snapshot inside the data dir.
pub const HIGH_TS_SNAPSHOT: &str = "high_ts_snapshot.json";

/// Build the runtime state for `node_id`: its shard table (primary
/// shard plus every shard it is a secondary of) with HighTS seeded
/// from the snapshot in `data_dir`, and an empty versioned store.
pub fn build_node_state(
    config: &ReplicationConfig,
    node_id: &str,
    data_dir: &Path,
) -> Result<NodeState> {
    let mut shards: HashMap<u64, Arc<ShardState>> = HashMap::new();

    if let Some(meta) = config.primary_shard_of(node_id) {
        shards.insert(
            meta.id,
            Arc::new(ShardState::new(meta.clone(), ShardRole::Primary)),
        );
    }
    for meta in config.secondary_shards_of(node_id) {
        shards.insert(
            meta.id,
            Arc::new(ShardState::new(meta.clone(), ShardRole::Secondary)),
        );
    }
    if shards.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "node {} owns no shard in the replication config",
            node_id
        )));
    }

    let snapshot = load_high_ts_snapshot(data_dir.join(HIGH_TS_SNAPSHOT))?;
    for (shard_id, ts) in snapshot {
        if let Some(shard) = shards.get(&shard_id) {
            shard.seed_high_ts(ts);
            tracing::info!(shard = shard_id, high_ts = ts, "seeded HighTS from snapshot");
        }
    }

    Ok(NodeState {
        node_id: node_id.to_string(),
        store: Arc::new(MemStore::new()),
        shards: Arc::new(shards),
        clock: Arc::new(TimestampOracle::new()),
    })
}

/// A storage node serving one slice of the key space.
pub struct StorageNode {
    config: Arc<ReplicationConfig>,
    node_id: String,
    data_dir: PathBuf,
}

impl StorageNode {
    pub fn new(
        config: Arc<ReplicationConfig>,
        node_id: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let node_id = node_id.into();
        if config.node_address(&node_id).is_none() {
            return Err(Error::InvalidConfig(format!(
                "node {} not present in replication config",
                node_id
            )));
        }
        Ok(Self {
            config,
            node_id,
            data_dir: data_dir.into(),
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(HIGH_TS_SNAPSHOT)
    }

    /// Bind the address configured for this node and serve.
    pub async fn serve(self) -> Result<()> {
        let addr = self
            .config
            .node_address(&self.node_id)
            .expect("checked in new")
            .to_string();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener until shutdown, then write
    /// the HighTS snapshot.
    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        let state = build_node_state(&self.config, &self.node_id, &self.data_dir)?;

        tracing::info!("Starting storage node: {}", self.node_id);
        tracing::info!("  Listening on: {}", listener.local_addr()?);
        tracing::info!("  Data dir: {}", self.data_dir.display());
        for shard in state.shards.values() {
            tracing::info!(
                "  Shard {} [{}, {}]: {:?}",
                shard.meta.id,
                shard.meta.range_start,
                shard.meta.range_end,
                shard.role
            );
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        let pull_handles = spawn_pull_loops(&state, http);

        let router = create_router(state.clone());
        tracing::info!("Storage node ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        for handle in pull_handles {
            handle.abort();
        }
        save_high_ts_snapshot(self.data_dir.join(HIGH_TS_SNAPSHOT), &state.shards)?;
        tracing::info!("HighTS snapshot written to {}", self.data_dir.display());
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
