//! Coordinator reconfiguration flow and utility-drop reporting

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use slakv::client::{
    Monitor, ReadStatus, ReportingConfig, SlaStatus, SubSlaStatus, UtilityDropReport,
};
use slakv::common::{ConsistencyLevel, Sla, SubSla};
use slakv::Coordinator;
use tokio::net::TcpListener;
use tokio::time::timeout;

use common::{spawn_json_capture, two_node_config};

const PRIMARY: &str = "10.0.0.1:9999";

fn rmw_sub() -> SubSla {
    SubSla {
        consistency: ConsistencyLevel::ReadMyWrites,
        latency_bound: Duration::from_millis(200),
        staleness_bound: None,
        utility: 0.9,
    }
}

fn cart_sla() -> Sla {
    Sla {
        id: "cart".into(),
        sub_slas: vec![rmw_sub()],
    }
}

/// Histogram dominated by latency misses on read-my-writes at the
/// primary.
fn lat_not_met_histogram() -> HashMap<String, u64> {
    let status = ReadStatus {
        node: PRIMARY.into(),
        summary: vec![SubSlaStatus {
            sub_sla: rmw_sub(),
            status: SlaStatus::LatencyNotMet,
        }],
    };
    HashMap::from([(status.canonical_key(), 5)])
}

fn drop_report(secondary: &str) -> UtilityDropReport {
    UtilityDropReport {
        client_id: "client-1".into(),
        region: "east".into(),
        avg_utility: 0.3,
        sla: cart_sla(),
        histogram: lat_not_met_histogram(),
        rtts: HashMap::from([(PRIMARY.to_string(), 120.0), (secondary.to_string(), 15.0)]),
    }
}

async fn spawn_coordinator(config: slakv::common::ReplicationConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let coordinator = Coordinator::new(Arc::new(config));
    tokio::spawn(async move {
        coordinator.serve_on(listener).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_coordinator_halves_replication_period() {
    // The "secondary" is a capture server standing in for node b.
    let (secondary, mut adjustments) = spawn_json_capture("/adjust_replication").await;
    let config = two_node_config(PRIMARY, &secondary, 20.0);
    let coord_addr = spawn_coordinator(config).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{}/report", coord_addr))
        .json(&drop_report(&secondary))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    // 20 s halved.
    let adjust = timeout(Duration::from_secs(3), adjustments.recv())
        .await
        .expect("coordinator should contact the secondary")
        .unwrap();
    assert_eq!(adjust["shardID"], 0);
    assert_eq!(adjust["new_freq"], 10.0);
}

#[tokio::test]
async fn test_report_cooldown_limits_adjustments() {
    let (secondary, mut adjustments) = spawn_json_capture("/adjust_replication").await;
    let config = two_node_config(PRIMARY, &secondary, 20.0);
    let coord_addr = spawn_coordinator(config).await;
    let http = reqwest::Client::new();
    let url = format!("http://{}/report", coord_addr);

    let first = http
        .post(&url)
        .json(&drop_report(&secondary))
        .send()
        .await
        .unwrap();
    assert!(first.status().is_success());

    // Second report from the same (client, region) within 2 s.
    let second = http
        .post(&url)
        .json(&drop_report(&secondary))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), reqwest::StatusCode::TOO_MANY_REQUESTS);

    // Exactly one downstream adjustment.
    timeout(Duration::from_secs(3), adjustments.recv())
        .await
        .expect("first report should adjust")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(adjustments.try_recv().is_err());
}

#[tokio::test]
async fn test_period_floor_blocks_adjustment() {
    let (secondary, mut adjustments) = spawn_json_capture("/adjust_replication").await;
    // Already at 4 s, under the 5 s floor.
    let config = two_node_config(PRIMARY, &secondary, 4.0);
    let coord_addr = spawn_coordinator(config).await;

    let http = reqwest::Client::new();
    let resp = http
        .post(format!("http://{}/report", coord_addr))
        .json(&drop_report(&secondary))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(adjustments.try_recv().is_err());
}

#[tokio::test]
async fn test_monitor_emits_one_drop_report_per_cooldown() {
    let (coord, mut reports) = spawn_json_capture("/report").await;

    let monitor = Monitor::new();
    monitor.enable_reporting(
        ReportingConfig {
            client_id: "client-1".into(),
            region: "east".into(),
            sla: cart_sla(),
            coordinator_url: format!("http://{}/report", coord),
        },
        reqwest::Client::new(),
    );
    monitor.record_rtt(PRIMARY, Duration::from_millis(12));

    // Several consecutive low utilities; the cooldown admits one
    // report.
    for _ in 0..5 {
        monitor.record_utility(0.2);
    }

    let report = timeout(Duration::from_secs(3), reports.recv())
        .await
        .expect("drop report should be posted")
        .unwrap();
    assert_eq!(report["client_id"], "client-1");
    assert_eq!(report["region"], "east");
    let avg = report["utility"].as_f64().unwrap();
    assert!((avg - 0.2).abs() < 1e-9);
    assert!(report["rtts"].as_object().unwrap().contains_key(PRIMARY));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(reports.try_recv().is_err());
}

#[tokio::test]
async fn test_healthy_utility_never_reports() {
    let (coord, mut reports) = spawn_json_capture("/report").await;

    let monitor = Monitor::new();
    monitor.enable_reporting(
        ReportingConfig {
            client_id: "client-2".into(),
            region: "west".into(),
            sla: cart_sla(),
            coordinator_url: format!("http://{}/report", coord),
        },
        reqwest::Client::new(),
    );

    for _ in 0..10 {
        monitor.record_utility(0.9);
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(reports.try_recv().is_err());
}
