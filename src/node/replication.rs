//! Pull-based replication loops
//!
//! A secondary runs one loop per shard it replicates. Each cycle it
//! sleeps for the shard's current pull period (re-read every
//! iteration so `/adjust_replication` takes effect on the next
//! cycle), then asks the primary for everything newer than its own
//! HighTS. A failed pull is logged and leaves HighTS untouched; the
//! next cycle retries from the same point.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::node::http::{NodeState, ReplicateResponse};
use crate::node::shard::{ShardRole, ShardState};
use crate::node::store::VersionedStore;

/// Spawn one pull loop per shard this node is a secondary of.
pub fn spawn_pull_loops(state: &NodeState, http: reqwest::Client) -> Vec<JoinHandle<()>> {
    state
        .shards
        .values()
        .filter(|s| s.role == ShardRole::Secondary)
        .map(|shard| {
            let shard = Arc::clone(shard);
            let store = Arc::clone(&state.store);
            let http = http.clone();
            let node_id = state.node_id.clone();
            tokio::spawn(async move {
                tracing::info!(
                    node = %node_id,
                    shard = shard.meta.id,
                    primary = %shard.meta.primary,
                    "starting pull loop"
                );
                loop {
                    let period = shard.pull_period();
                    tokio::time::sleep(period).await;
                    if let Err(e) = pull_once(&shard, store.as_ref(), &http).await {
                        tracing::warn!(
                            shard = shard.meta.id,
                            error = %e,
                            "replication pull failed; will retry next cycle"
                        );
                    }
                }
            })
        })
        .collect()
}

/// One replication round against the shard's primary.
pub async fn pull_once(
    shard: &ShardState,
    store: &dyn VersionedStore,
    http: &reqwest::Client,
) -> Result<()> {
    let since = shard.high_ts();
    let url = format!(
        "http://{}/replicate?since={}&start={}&end={}",
        shard.meta.primary, since, shard.meta.range_start, shard.meta.range_end
    );

    let resp = http.get(&url).send().await?;
    if !resp.status().is_success() {
        return Err(Error::Transport(format!(
            "replicate returned {} from {}",
            resp.status(),
            shard.meta.primary
        )));
    }
    let body: ReplicateResponse = resp.json().await?;

    match body.updates {
        Some(updates) if !updates.is_empty() => {
            let mut max_ts = since;
            let count = updates.len();
            for update in updates {
                // Range is not re-checked here: replication writes
                // carry the primary's authority.
                store.set(&update.key, update.value, update.timestamp);
                max_ts = max_ts.max(update.timestamp);
            }
            shard.advance_high_ts(max_ts);
            tracing::debug!(
                shard = shard.meta.id,
                count,
                high_ts = shard.high_ts(),
                "applied replication updates"
            );
        }
        _ => {
            // Idle primary: adopt its published HighTS.
            shard.advance_high_ts(body.version);
        }
    }
    Ok(())
}
