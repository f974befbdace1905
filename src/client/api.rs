//! Client read/write API
//!
//! `ClientContext` carries everything a client needs: the replication
//! config, the monitor, the optimizer, and one long-lived pooled HTTP
//! client. Entry points take the context explicitly so tests can run
//! independent clients in parallel.
//!
//! Reads retry up to 3 times on transport errors with a 100 ms gap;
//! writes never retry. Session state is only updated on success.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio::task::JoinHandle;

use crate::client::monitor::{
    Monitor, ReadStatus, ReportingConfig, SlaStatus, SubSlaStatus,
};
use crate::client::optimizer::{Optimizer, ReadPlan};
use crate::client::session::{ServerSelectionPolicy, Session, SessionSummary};
use crate::common::{
    ClientCoordinatorConfig, ConsistencyLevel, Error, ReplicationConfig, Result, Sla, SubSla,
    TS_NOT_APPLICABLE,
};
use crate::node::http::{GetResponse, SetRequest, SetResponse};

/// RTT samples discarded per node before recording begins.
const COLD_START_SAMPLES: u32 = 5;

/// Untimed warm-up requests before timed probe samples.
const PROBE_WARMUPS: u32 = 2;

const READ_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of a Get: the value plus which sub-SLA the read actually
/// achieved. `sub_achieved == None` is an SLA miss, not an error.
#[derive(Debug, Clone)]
pub struct GetOutcome {
    pub value: String,
    pub timestamp: i64,
    pub sub_achieved: Option<SubSla>,
    pub utility: f64,
}

struct ReadSample {
    value: String,
    obj_ts: i64,
    node_hts: i64,
    rtt: Duration,
}

/// Per-client state: config, monitor, optimizer, HTTP pool.
pub struct ClientContext {
    config: Arc<ReplicationConfig>,
    pub monitor: Arc<Monitor>,
    optimizer: Optimizer,
    http: reqwest::Client,
    cold_start: Mutex<HashMap<String, u32>>,
}

impl ClientContext {
    pub fn new(config: Arc<ReplicationConfig>) -> Result<Self> {
        let monitor = Arc::new(Monitor::new());
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(100)
            .build()
            .map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self {
            optimizer: Optimizer::new(Arc::clone(&config), Arc::clone(&monitor)),
            config,
            monitor,
            http,
            cold_start: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn begin_session(&self, sla: Sla, policy: ServerSelectionPolicy) -> Session {
        Session::new(sla, policy)
    }

    pub fn end_session(&self, session: &mut Session) -> SessionSummary {
        let summary = session.finish();
        tracing::info!(
            avg_utility = summary.avg_utility,
            reads = summary.reads,
            writes = summary.writes,
            "session ended"
        );
        summary
    }

    /// Write through the shard primary. Returns the put timestamp,
    /// which is also recorded in `session.objects_written`.
    pub async fn put(&self, session: &mut Session, key: &str, value: &str) -> Result<i64> {
        let primary = self.config.shard_for_key(key).primary.clone();
        let url = format!("http://{}/set", primary);
        let body = SetRequest {
            key: key.to_string(),
            value: value.to_string(),
        };

        let start = Instant::now();
        let resp = self.http.post(&url).json(&body).send().await?;
        let rtt = start.elapsed();

        if !resp.status().is_success() {
            return Err(Error::Transport(format!(
                "set returned {} from {}",
                resp.status(),
                primary
            )));
        }
        let parsed: SetResponse = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;

        self.record_rtt_gated(&primary, rtt);
        session
            .objects_written
            .insert(key.to_string(), parsed.put_timestamp);
        Ok(parsed.put_timestamp)
    }

    /// Read `key` under `sla` (or the session default), routed by the
    /// session's server-selection policy.
    pub async fn get(&self, session: &mut Session, key: &str, sla: Option<&Sla>) -> Result<GetOutcome> {
        let active = sla.cloned().unwrap_or_else(|| session.default_sla.clone());
        match session.policy {
            ServerSelectionPolicy::Pileus => self.pileus_get(session, key, &active).await,
            ServerSelectionPolicy::Primary => self.primary_get(session, key, &active).await,
            ServerSelectionPolicy::Random => {
                let node = self
                    .config
                    .nodes
                    .choose(&mut rand::thread_rng())
                    .map(|n| n.address.clone())
                    .ok_or_else(|| Error::InvalidConfig("empty node set".into()))?;
                self.fixed_node_get(session, key, &active, node).await
            }
            ServerSelectionPolicy::Closest => {
                let Some((node, _)) = self.monitor.lowest_avg_rtt_node() else {
                    return Err(Error::Internal("no RTT samples recorded yet".into()));
                };
                self.fixed_node_get(session, key, &active, node).await
            }
        }
    }

    /// Optimizer-driven read: contact the replica with the highest
    /// expected utility, then verify post hoc which sub-SLA the read
    /// actually achieved.
    async fn pileus_get(&self, session: &mut Session, key: &str, sla: &Sla) -> Result<GetOutcome> {
        let ReadPlan {
            node,
            target,
            min_read_ts,
        } = self.optimizer.find_node_to_read(session, key, sla);

        let (Some(node), Some(target)) = (node, target) else {
            // No replica satisfies any sub-SLA: an SLA miss with no read.
            session.utilities.push(0.0);
            self.monitor.record_utility(0.0);
            return Ok(GetOutcome {
                value: String::new(),
                timestamp: TS_NOT_APPLICABLE,
                sub_achieved: None,
                utility: 0.0,
            });
        };
        tracing::debug!(key, node = %node, target = ?target.consistency, "pileus read");

        let sample = match self.read_from_node(key, &node).await {
            Ok(sample) => sample,
            Err(e) => {
                session.utilities.push(0.0);
                self.monitor.record_utility(0.0);
                return Err(e);
            }
        };

        let (achieved, summary) =
            detect_sub_sla_hit(sample.node_hts, sample.rtt, &target, sla, &min_read_ts);
        self.monitor.record_read_status(&ReadStatus {
            node: node.clone(),
            summary,
        });

        match achieved {
            Some(sub) => {
                let utility = sub.utility;
                session.utilities.push(utility);
                self.monitor.record_utility(utility);
                session.objects_read.insert(key.to_string(), sample.obj_ts);
                Ok(GetOutcome {
                    value: sample.value,
                    timestamp: sample.obj_ts,
                    sub_achieved: Some(sub),
                    utility,
                })
            }
            None => {
                session.utilities.push(0.0);
                self.monitor.record_utility(0.0);
                Ok(GetOutcome {
                    value: sample.value,
                    timestamp: sample.obj_ts,
                    sub_achieved: None,
                    utility: 0.0,
                })
            }
        }
    }

    /// Always read the shard primary. Consistency is trivially
    /// satisfied; the highest-ranked sub-SLA within latency wins.
    async fn primary_get(&self, session: &mut Session, key: &str, sla: &Sla) -> Result<GetOutcome> {
        let primary = self.config.shard_for_key(key).primary.clone();
        let sample = match self.read_from_node(key, &primary).await {
            Ok(sample) => sample,
            Err(e) => {
                session.utilities.push(0.0);
                return Err(e);
            }
        };

        for sub in &sla.sub_slas {
            if sample.rtt <= sub.latency_bound {
                session.utilities.push(sub.utility);
                return Ok(GetOutcome {
                    value: sample.value,
                    timestamp: sample.obj_ts,
                    utility: sub.utility,
                    sub_achieved: Some(sub.clone()),
                });
            }
        }

        session.utilities.push(0.0);
        Ok(GetOutcome {
            value: sample.value,
            timestamp: sample.obj_ts,
            sub_achieved: None,
            utility: 0.0,
        })
    }

    /// Read from a pre-chosen node (Random/Closest policies). When
    /// the SLA has HighTS-based sub-clauses, the minimum read
    /// timestamps are recomputed through the optimizer and checked
    /// against the node's reported HighTS.
    async fn fixed_node_get(
        &self,
        session: &mut Session,
        key: &str,
        sla: &Sla,
        node: String,
    ) -> Result<GetOutcome> {
        let primary = self.config.shard_for_key(key).primary.clone();
        let min_read_ts = if sla.demands_hts() {
            Some(self.optimizer.find_node_to_read(session, key, sla).min_read_ts)
        } else {
            None
        };

        let sample = match self.read_from_node(key, &node).await {
            Ok(sample) => sample,
            Err(e) => {
                session.utilities.push(0.0);
                return Err(e);
            }
        };

        for (i, sub) in sla.sub_slas.iter().enumerate() {
            if sample.rtt > sub.latency_bound {
                continue;
            }
            let consistent = match sub.consistency {
                ConsistencyLevel::Strong => node == primary,
                ConsistencyLevel::Eventual => true,
                _ => {
                    let min_ts = min_read_ts.as_ref().map(|v| v[i]).unwrap_or(0);
                    sample.node_hts >= min_ts
                }
            };
            if consistent {
                session.utilities.push(sub.utility);
                return Ok(GetOutcome {
                    value: sample.value,
                    timestamp: sample.obj_ts,
                    utility: sub.utility,
                    sub_achieved: Some(sub.clone()),
                });
            }
        }

        session.utilities.push(0.0);
        Ok(GetOutcome {
            value: sample.value,
            timestamp: sample.obj_ts,
            sub_achieved: None,
            utility: 0.0,
        })
    }

    /// One read with retries. Successful reads record RTT (after the
    /// per-node cold-start warm-up) and the node's HighTS. Malformed
    /// bodies are not retried.
    async fn read_from_node(&self, key: &str, node: &str) -> Result<ReadSample> {
        let url = format!("http://{}/get?key={}", node, key);
        let mut last_err = Error::Transport(format!("no attempts against {}", node));

        for attempt in 1..=READ_RETRIES {
            let start = Instant::now();
            let result = self.http.get(&url).send().await;
            let rtt = start.elapsed();

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let body: GetResponse = resp
                        .json()
                        .await
                        .map_err(|e| Error::Protocol(e.to_string()))?;
                    self.record_rtt_gated(node, rtt);
                    self.monitor.record_hts(node, body.high_ts);
                    return Ok(ReadSample {
                        value: body.value,
                        obj_ts: body.timestamp,
                        node_hts: body.high_ts,
                        rtt,
                    });
                }
                Ok(resp) => {
                    last_err = Error::Transport(format!(
                        "get returned {} from {}",
                        resp.status(),
                        node
                    ));
                }
                Err(e) => {
                    last_err = e.into();
                }
            }
            tracing::warn!(attempt, node, error = %last_err, "read attempt failed");
            if attempt < READ_RETRIES {
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }

        Err(last_err)
    }

    /// Discard the first `COLD_START_SAMPLES` RTTs per node, then
    /// record every sample.
    fn record_rtt_gated(&self, node: &str, rtt: Duration) {
        {
            let mut counts = self.cold_start.lock().unwrap();
            let seen = counts.entry(node.to_string()).or_insert(0);
            if *seen < COLD_START_SAMPLES {
                *seen += 1;
                return;
            }
        }
        self.monitor.record_rtt(node, rtt);
    }

    /// Warm every node's RTT window: per node, 2 untimed warm-ups
    /// then `ping_count` timed probes recorded directly.
    pub async fn send_probes(&self, ping_count: u32) {
        for node in &self.config.nodes {
            if let Err(e) = self.measure_probe_rtt(&node.address, ping_count).await {
                tracing::warn!(node = %node.address, error = %e, "probe round failed");
            }
        }
    }

    pub async fn measure_probe_rtt(&self, host: &str, ping_count: u32) -> Result<()> {
        let url = format!("http://{}/probe", host);

        for _ in 0..PROBE_WARMUPS {
            if let Err(e) = self.http.get(&url).send().await {
                tracing::debug!(host, error = %e, "probe warm-up failed");
            }
        }

        for _ in 0..ping_count {
            let start = Instant::now();
            let resp = self.http.get(&url).send().await?;
            let rtt = start.elapsed();
            if !resp.status().is_success() {
                return Err(Error::Transport(format!(
                    "probe returned {} from {}",
                    resp.status(),
                    host
                )));
            }
            self.monitor.record_rtt(host, rtt);
        }
        Ok(())
    }

    /// Turn on utility-drop reporting to the region's coordinator.
    pub fn enable_reporting(&self, client: ClientCoordinatorConfig, sla: Sla) {
        self.monitor.enable_reporting(
            ReportingConfig {
                client_id: client.client_id,
                region: client.region,
                sla,
                coordinator_url: client.coordinator_url,
            },
            self.http.clone(),
        );
    }

    /// Periodically re-evaluate the utility-drop predicate. Shares
    /// the monitor's report cooldown with the drop-triggered path.
    pub fn spawn_utility_reporter(&self, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(&self.monitor);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.maybe_report_drop();
            }
        })
    }
}

/// Decide which sub-SLA a finished read actually satisfied, walking
/// the SLA in rank order. The optimizer only maximizes an
/// expectation; the RTT and HighTS observed at read time can differ
/// from their estimates, so the award is always post hoc.
pub fn detect_sub_sla_hit(
    node_hts: i64,
    rtt: Duration,
    target: &SubSla,
    sla: &Sla,
    min_read_ts: &[i64],
) -> (Option<SubSla>, Vec<SubSlaStatus>) {
    let mut summary = Vec::with_capacity(sla.sub_slas.len());

    match target.consistency {
        // A primary read satisfies every consistency level; only
        // latency can miss.
        ConsistencyLevel::Strong => {
            for sub in &sla.sub_slas {
                if rtt <= sub.latency_bound {
                    summary.push(SubSlaStatus {
                        sub_sla: sub.clone(),
                        status: SlaStatus::Met,
                    });
                    return (Some(sub.clone()), summary);
                }
                summary.push(SubSlaStatus {
                    sub_sla: sub.clone(),
                    status: SlaStatus::LatencyNotMet,
                });
            }
        }
        // An eventual read can only be awarded eventual sub-SLAs.
        ConsistencyLevel::Eventual => {
            for sub in &sla.sub_slas {
                if sub.consistency != ConsistencyLevel::Eventual {
                    summary.push(SubSlaStatus {
                        sub_sla: sub.clone(),
                        status: SlaStatus::NotApplicable,
                    });
                    continue;
                }
                if rtt <= sub.latency_bound {
                    summary.push(SubSlaStatus {
                        sub_sla: sub.clone(),
                        status: SlaStatus::Met,
                    });
                    return (Some(sub.clone()), summary);
                }
                summary.push(SubSlaStatus {
                    sub_sla: sub.clone(),
                    status: SlaStatus::LatencyNotMet,
                });
            }
        }
        // HighTS-based targets: both the latency bound and the
        // minimum read timestamp must hold.
        _ => {
            for (i, sub) in sla.sub_slas.iter().enumerate() {
                let status = if rtt > sub.latency_bound {
                    SlaStatus::LatencyNotMet
                } else if node_hts < min_read_ts.get(i).copied().unwrap_or(0) {
                    SlaStatus::ConsistencyNotMet
                } else {
                    summary.push(SubSlaStatus {
                        sub_sla: sub.clone(),
                        status: SlaStatus::Met,
                    });
                    return (Some(sub.clone()), summary);
                };
                summary.push(SubSlaStatus {
                    sub_sla: sub.clone(),
                    status,
                });
            }
        }
    }

    (None, summary)
}
