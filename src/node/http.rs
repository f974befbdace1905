//! HTTP surface of a storage node
//!
//! Endpoints: `/probe`, `/set`, `/get`, `/replicate`, `/status`,
//! `/adjust_replication`. All bodies are JSON. Writes are only
//! accepted on the primary of the shard that owns the key;
//! replication writes arrive through the pull loop, never here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::node::shard::{ShardRole, ShardState, TimestampOracle};
use crate::node::store::{Record, VersionedStore};

/// Shared storage-node state for HTTP handlers.
#[derive(Clone)]
pub struct NodeState {
    pub node_id: String,
    pub store: Arc<dyn VersionedStore>,
    /// Shards this node participates in, keyed by shard id.
    pub shards: Arc<HashMap<u64, Arc<ShardState>>>,
    pub clock: Arc<TimestampOracle>,
}

impl NodeState {
    /// The shard containing `key` among this node's shards.
    fn shard_for_key(&self, key: &str) -> Option<&Arc<ShardState>> {
        let numeric: i64 = key.parse().ok()?;
        self.shards.values().find(|s| s.meta.contains(numeric))
    }

    /// The shard this node is primary for whose range contains `key`.
    fn primary_shard_for_key(&self, key: &str) -> Option<&Arc<ShardState>> {
        self.shard_for_key(key)
            .filter(|s| s.role == ShardRole::Primary)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetRequest {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetResponse {
    pub put_timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
    #[serde(rename = "highTS")]
    pub high_ts: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateResponse {
    /// `None` when the primary has nothing newer than `since`.
    pub updates: Option<Vec<Record>>,
    /// Primary HighTS when `updates` is `None`; -1 otherwise (the
    /// secondary derives its HighTS from the update timestamps).
    pub version: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustReplicationRequest {
    #[serde(rename = "shardID")]
    pub shard_id: u64,
    /// New pull period in seconds.
    pub new_freq: f64,
}

/// Build the storage-node router.
pub fn create_router(state: NodeState) -> Router {
    Router::new()
        .route("/probe", axum::routing::get(probe))
        .route("/set", axum::routing::post(handle_set))
        .route("/get", axum::routing::get(handle_get))
        .route("/replicate", axum::routing::get(handle_replicate))
        .route("/status", axum::routing::get(handle_status))
        .route(
            "/adjust_replication",
            axum::routing::post(handle_adjust_replication),
        )
        .with_state(state)
}

/// RTT warm-up target. Empty 200.
async fn probe() -> StatusCode {
    StatusCode::OK
}

async fn handle_set(
    State(state): State<NodeState>,
    Json(req): Json<SetRequest>,
) -> impl IntoResponse {
    let Some(shard) = state.primary_shard_for_key(&req.key) else {
        tracing::warn!(key = %req.key, node = %state.node_id, "rejecting write: not primary");
        return (
            StatusCode::BAD_REQUEST,
            format!("node {} is not primary for key {}", state.node_id, req.key),
        )
            .into_response();
    };

    let ts = state.clock.next();
    state.store.set(&req.key, req.value, ts);
    shard.advance_high_ts(ts);

    tracing::debug!(key = %req.key, ts, shard = shard.meta.id, "accepted write");
    Json(SetResponse { put_timestamp: ts }).into_response()
}

#[derive(Deserialize)]
struct GetParams {
    key: String,
}

async fn handle_get(
    State(state): State<NodeState>,
    Query(params): Query<GetParams>,
) -> impl IntoResponse {
    let Some(vv) = state.store.get(&params.key) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // HighTS for the shard owning the key, from this node's view
    // (primary or secondary).
    let high_ts = state
        .shard_for_key(&params.key)
        .map(|s| s.high_ts())
        .unwrap_or(0);

    Json(GetResponse {
        key: params.key,
        value: vv.value,
        timestamp: vv.timestamp,
        high_ts,
    })
    .into_response()
}

#[derive(Deserialize)]
struct ReplicateParams {
    since: i64,
    start: i64,
    end: i64,
}

/// Serve a secondary's pull: every record newer than `since` in the
/// requested range, or the primary's HighTS when there is none so an
/// idle primary still publishes progress.
async fn handle_replicate(
    State(state): State<NodeState>,
    Query(params): Query<ReplicateParams>,
) -> impl IntoResponse {
    let Some(shard) = state
        .shards
        .values()
        .find(|s| s.role == ShardRole::Primary && s.meta.contains(params.start))
    else {
        return (
            StatusCode::BAD_REQUEST,
            format!(
                "node {} is not primary for range start {}",
                state.node_id, params.start
            ),
        )
            .into_response();
    };

    let updates = state
        .store
        .scan_updates(params.since, params.start, params.end);

    if !updates.is_empty() {
        tracing::debug!(
            count = updates.len(),
            since = params.since,
            "serving replication updates"
        );
        return Json(ReplicateResponse {
            updates: Some(updates),
            version: -1,
        })
        .into_response();
    }

    Json(ReplicateResponse {
        updates: None,
        version: shard.high_ts(),
    })
    .into_response()
}

/// Map of shard id → HighTS for every shard this node is a secondary
/// of. Clients poll this during preload to wait out replication lag.
async fn handle_status(State(state): State<NodeState>) -> Json<HashMap<u64, i64>> {
    let status: HashMap<u64, i64> = state
        .shards
        .iter()
        .filter(|(_, s)| s.role == ShardRole::Secondary)
        .map(|(id, s)| (*id, s.high_ts()))
        .collect();
    Json(status)
}

async fn handle_adjust_replication(
    State(state): State<NodeState>,
    Json(req): Json<AdjustReplicationRequest>,
) -> impl IntoResponse {
    if req.new_freq <= 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            format!("non-positive replication period: {}", req.new_freq),
        )
            .into_response();
    }

    let Some(shard) = state.shards.get(&req.shard_id) else {
        return (
            StatusCode::NOT_FOUND,
            format!("shard {} not hosted on node {}", req.shard_id, state.node_id),
        )
            .into_response();
    };
    if shard.role != ShardRole::Secondary {
        return (
            StatusCode::BAD_REQUEST,
            format!("node {} is not a secondary for shard {}", state.node_id, req.shard_id),
        )
            .into_response();
    }

    let period = Duration::from_secs_f64(req.new_freq);
    shard.set_pull_period(period);
    tracing::info!(
        shard = req.shard_id,
        period_secs = req.new_freq,
        "replication period adjusted"
    );
    StatusCode::OK.into_response()
}
