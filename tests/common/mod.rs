//! Shared helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{Json, Router};
use slakv::common::{NodeInfo, ReplicationConfig, ShardConfig};
use slakv::StorageNode;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A two-node cluster: node "a" primary for shard 0 [0, 9999],
/// node "b" its only secondary.
pub struct TestCluster {
    pub config: Arc<ReplicationConfig>,
    pub addr_a: String,
    pub addr_b: String,
    handles: Vec<JoinHandle<()>>,
    _dirs: Vec<TempDir>,
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

pub fn two_node_config(addr_a: &str, addr_b: &str, rep_freq: f64) -> ReplicationConfig {
    let mut config = ReplicationConfig {
        nodes: vec![
            NodeInfo {
                id: "a".into(),
                address: addr_a.into(),
            },
            NodeInfo {
                id: "b".into(),
                address: addr_b.into(),
            },
        ],
        shards: vec![ShardConfig {
            id: 0,
            range_start: 0,
            range_end: 9999,
            primary: addr_a.into(),
            primary_id: "a".into(),
            secondary_ids: vec!["b".into()],
            secondaries: vec![],
            default_rep_freq: rep_freq,
        }],
    };
    config.resolve().unwrap();
    config
}

/// Start both nodes on ephemeral ports. `rep_freq` is node b's pull
/// period in seconds; tests that must observe staleness pass a large
/// one, tests that want fast convergence a small one.
pub async fn start_two_node_cluster(rep_freq: f64) -> TestCluster {
    let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr_a = listener_a.local_addr().unwrap().to_string();
    let addr_b = listener_b.local_addr().unwrap().to_string();

    let config = Arc::new(two_node_config(&addr_a, &addr_b, rep_freq));

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();

    let node_a = StorageNode::new(Arc::clone(&config), "a", dir_a.path()).unwrap();
    let node_b = StorageNode::new(Arc::clone(&config), "b", dir_b.path()).unwrap();

    let handle_a = tokio::spawn(async move {
        node_a.serve_on(listener_a).await.unwrap();
    });
    let handle_b = tokio::spawn(async move {
        node_b.serve_on(listener_b).await.unwrap();
    });

    TestCluster {
        config,
        addr_a,
        addr_b,
        handles: vec![handle_a, handle_b],
        _dirs: vec![dir_a, dir_b],
    }
}

/// A throwaway server that records every JSON body POSTed to `path`.
pub async fn spawn_json_capture(
    path: &'static str,
) -> (String, mpsc::UnboundedReceiver<serde_json::Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        path,
        axum::routing::post(move |Json(body): Json<serde_json::Value>| {
            let tx = tx.clone();
            async move {
                tx.send(body).ok();
                StatusCode::OK
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rx)
}
