//! Replication behavior: pull loops, reconfiguration, snapshots

mod common;

use std::sync::Arc;
use std::time::Duration;

use slakv::client::{ClientContext, ServerSelectionPolicy};
use slakv::common::Sla;
use slakv::node::{build_node_state, GetResponse};
use tempfile::TempDir;

use common::{start_two_node_cluster, two_node_config};

fn any_sla() -> Sla {
    Sla::from_json(
        r#"{"subSLAs": [{"rank": 1, "consistency": "eventual", "latency_bound": 1000, "utility": 1.0}]}"#,
        "eventual",
    )
    .unwrap()
}

#[tokio::test]
async fn test_pull_loop_propagates_with_timestamps() {
    // 50 ms pull period: convergence within a second.
    let cluster = start_two_node_cluster(0.05).await;
    let ctx = ClientContext::new(Arc::clone(&cluster.config)).unwrap();
    let mut session = ctx.begin_session(any_sla(), ServerSelectionPolicy::Pileus);

    let ts = ctx.put(&mut session, "0123", "replicated").await.unwrap();
    ctx.wait_for_secondaries_with("0123", ts, Duration::from_millis(50), Duration::from_secs(10))
        .await
        .unwrap();

    // The secondary serves the record with the primary's timestamp.
    let http = reqwest::Client::new();
    let from_b: GetResponse = http
        .get(format!("http://{}/get?key=0123", cluster.addr_b))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(from_b.value, "replicated");
    assert_eq!(from_b.timestamp, ts);
    assert!(from_b.high_ts >= ts);

    let from_a: GetResponse = http
        .get(format!("http://{}/get?key=0123", cluster.addr_a))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(from_a.timestamp, from_b.timestamp);
}

#[tokio::test]
async fn test_status_reports_secondary_shards_only() {
    let cluster = start_two_node_cluster(0.05).await;
    let ctx = ClientContext::new(Arc::clone(&cluster.config)).unwrap();
    let mut session = ctx.begin_session(any_sla(), ServerSelectionPolicy::Pileus);

    let ts = ctx.put(&mut session, "0200", "v").await.unwrap();
    ctx.wait_for_secondaries_with("0200", ts, Duration::from_millis(50), Duration::from_secs(10))
        .await
        .unwrap();

    let status_b = ctx.shard_status(&cluster.addr_b).await.unwrap();
    assert!(status_b[&0] >= ts);

    // The primary is secondary for nothing.
    let status_a = ctx.shard_status(&cluster.addr_a).await.unwrap();
    assert!(status_a.is_empty());
}

#[tokio::test]
async fn test_adjust_replication_takes_effect_next_cycle() {
    // Slow default: 3 s pull period.
    let cluster = start_two_node_cluster(3.0).await;
    let ctx = ClientContext::new(Arc::clone(&cluster.config)).unwrap();
    let mut session = ctx.begin_session(any_sla(), ServerSelectionPolicy::Pileus);

    let ts = ctx.put(&mut session, "0300", "v").await.unwrap();

    // Well before the first 5 s pull, the secondary is still behind.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let status = ctx.shard_status(&cluster.addr_b).await.unwrap();
    assert!(status[&0] < ts);

    // Speed it up; the running loop re-reads the period each cycle.
    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{}/adjust_replication", cluster.addr_b))
        .json(&serde_json::json!({"shardID": 0, "new_freq": 0.05}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    ctx.wait_for_secondaries_with("0300", ts, Duration::from_millis(100), Duration::from_secs(10))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_adjust_replication_rejects_bad_requests() {
    let cluster = start_two_node_cluster(5.0).await;
    let http = reqwest::Client::new();

    // Unknown shard.
    let resp = http
        .post(format!("http://{}/adjust_replication", cluster.addr_b))
        .json(&serde_json::json!({"shardID": 7, "new_freq": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    // Primary is not a pull target.
    let resp = http
        .post(format!("http://{}/adjust_replication", cluster.addr_a))
        .json(&serde_json::json!({"shardID": 0, "new_freq": 1.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    // Non-positive period.
    let resp = http
        .post(format!("http://{}/adjust_replication", cluster.addr_b))
        .json(&serde_json::json!({"shardID": 0, "new_freq": 0.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_restart_restores_high_ts_from_snapshot() {
    let config = Arc::new(two_node_config("127.0.0.1:1", "127.0.0.1:2", 20.0));
    let dir = TempDir::new().unwrap();

    // First life: the secondary saw up to 1234, then snapshotted.
    {
        let state = build_node_state(&config, "b", dir.path()).unwrap();
        let shard = &state.shards[&0];
        shard.advance_high_ts(1234);
        slakv::node::shard::save_high_ts_snapshot(
            dir.path().join(slakv::node::HIGH_TS_SNAPSHOT),
            &state.shards,
        )
        .unwrap();
    }

    // Second life: HighTS restored before any pull.
    let state = build_node_state(&config, "b", dir.path()).unwrap();
    assert_eq!(state.shards[&0].high_ts(), 1234);
}
