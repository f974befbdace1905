//! Utility-maximizing replica selection
//!
//! For each sub-SLA, candidate nodes are those whose last observed
//! HighTS satisfies the consistency predicate; among them the node
//! with the highest probability of meeting the latency bound wins,
//! ties broken by lower average RTT. The sub-SLA with the greatest
//! expected utility (declared utility × latency probability) decides
//! the read target. Strictly greater only: equal scores keep the
//! earlier, higher-ranked selection.

use std::sync::Arc;
use std::time::Duration;

use crate::client::monitor::Monitor;
use crate::client::session::Session;
use crate::common::{
    now_millis, ConsistencyLevel, ReplicationConfig, ShardConfig, Sla, SubSla, TS_NOT_APPLICABLE,
};

/// Output of `find_node_to_read`.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    /// Chosen node address; `None` when no sub-SLA had a candidate
    /// and the caller must treat the read as an SLA miss.
    pub node: Option<String>,
    /// The sub-SLA the chosen node is expected to satisfy.
    pub target: Option<SubSla>,
    /// Per-sub-SLA minimum acceptable read timestamp, in declared
    /// order. -1 where the predicate does not use one.
    pub min_read_ts: Vec<i64>,
}

pub struct Optimizer {
    config: Arc<ReplicationConfig>,
    monitor: Arc<Monitor>,
}

impl Optimizer {
    pub fn new(config: Arc<ReplicationConfig>, monitor: Arc<Monitor>) -> Self {
        Self { config, monitor }
    }

    /// Choose the (node, sub-SLA) pair maximizing expected utility
    /// for this read.
    pub fn find_node_to_read(&self, session: &Session, key: &str, sla: &Sla) -> ReadPlan {
        let mut min_read_ts = Vec::with_capacity(sla.sub_slas.len());
        let mut best: Option<(String, SubSla)> = None;
        let mut best_score = f64::NEG_INFINITY;

        for sub in &sla.sub_slas {
            let (candidates, min_ts) = self.select_nodes(session, key, sub);
            min_read_ts.push(min_ts);

            let Some((node, prob)) = self.best_candidate(&candidates, sub.latency_bound) else {
                continue;
            };
            let expected = sub.utility * prob;
            if expected > best_score {
                best_score = expected;
                best = Some((node, sub.clone()));
            }
        }

        match best {
            Some((node, target)) => ReadPlan {
                node: Some(node),
                target: Some(target),
                min_read_ts,
            },
            None => ReadPlan {
                node: None,
                target: None,
                min_read_ts,
            },
        }
    }

    /// Candidate nodes for one sub-SLA's consistency predicate, plus
    /// the minimum read timestamp a replica's HighTS must reach.
    pub fn select_nodes(&self, session: &Session, key: &str, sub: &SubSla) -> (Vec<String>, i64) {
        let shard = self.config.shard_for_key(key);
        match sub.consistency {
            ConsistencyLevel::Strong => (vec![shard.primary.clone()], TS_NOT_APPLICABLE),
            ConsistencyLevel::Eventual => {
                let all = self.config.nodes.iter().map(|n| n.address.clone()).collect();
                (all, 0)
            }
            ConsistencyLevel::ReadMyWrites => {
                let wrote = session.objects_written.get(key).copied().unwrap_or(0);
                (self.fresh_enough(shard, wrote), wrote)
            }
            ConsistencyLevel::MonotonicReads => {
                let read = session.objects_read.get(key).copied().unwrap_or(0);
                (self.fresh_enough(shard, read), read)
            }
            ConsistencyLevel::Bounded => {
                let staleness = sub
                    .staleness_bound
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                let min_ts = now_millis() - staleness;
                (self.fresh_enough(shard, min_ts), min_ts)
            }
        }
    }

    /// Primary plus every secondary whose observed HighTS has reached
    /// `min_ts`.
    fn fresh_enough(&self, shard: &ShardConfig, min_ts: i64) -> Vec<String> {
        let mut nodes = vec![shard.primary.clone()];
        for secondary in &shard.secondaries {
            if self.monitor.hts(secondary) >= min_ts {
                nodes.push(secondary.clone());
            }
        }
        nodes
    }

    /// The candidate most likely to answer within `latency_bound`,
    /// optimistically assuming unknown nodes are fast. Ties go to the
    /// lower average RTT.
    fn best_candidate(&self, candidates: &[String], latency_bound: Duration) -> Option<(String, f64)> {
        let mut best: Option<(String, f64, Duration)> = None;
        for node in candidates {
            let prob = self
                .monitor
                .probability_rtt_below(node, latency_bound, true);
            let avg = self.monitor.avg_rtt(node);
            let better = match &best {
                None => true,
                Some((_, best_prob, best_avg)) => {
                    prob > *best_prob || (prob == *best_prob && avg < *best_avg)
                }
            };
            if better {
                best = Some((node.clone(), prob, avg));
            }
        }
        best.map(|(node, prob, _)| (node, prob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::session::ServerSelectionPolicy;
    use crate::common::{NodeInfo, ReplicationConfig, ShardConfig};

    const A: &str = "10.0.0.1:8080";
    const B: &str = "10.0.0.2:8080";

    fn config() -> Arc<ReplicationConfig> {
        let mut config = ReplicationConfig {
            nodes: vec![
                NodeInfo {
                    id: "a".into(),
                    address: A.into(),
                },
                NodeInfo {
                    id: "b".into(),
                    address: B.into(),
                },
            ],
            shards: vec![ShardConfig {
                id: 0,
                range_start: 0,
                range_end: 9999,
                primary: A.into(),
                primary_id: "a".into(),
                secondary_ids: vec!["b".into()],
                secondaries: vec![],
                default_rep_freq: 20.0,
            }],
        };
        config.resolve().unwrap();
        Arc::new(config)
    }

    fn sub(consistency: ConsistencyLevel, latency_ms: u64, utility: f64) -> SubSla {
        SubSla {
            consistency,
            latency_bound: Duration::from_millis(latency_ms),
            staleness_bound: None,
            utility,
        }
    }

    fn sla(subs: Vec<SubSla>) -> Sla {
        Sla {
            id: "test".into(),
            sub_slas: subs,
        }
    }

    fn session(sla: &Sla) -> Session {
        Session::new(sla.clone(), ServerSelectionPolicy::Pileus)
    }

    #[test]
    fn test_strong_routes_to_primary() {
        let monitor = Arc::new(Monitor::new());
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let sla = sla(vec![sub(ConsistencyLevel::Strong, 1000, 1.0)]);
        let session = session(&sla);

        let plan = optimizer.find_node_to_read(&session, "0001", &sla);
        assert_eq!(plan.node.as_deref(), Some(A));
        assert_eq!(plan.min_read_ts, vec![TS_NOT_APPLICABLE]);
    }

    #[test]
    fn test_latency_probability_picks_closer_replica() {
        let monitor = Arc::new(Monitor::new());
        for _ in 0..100 {
            monitor.record_rtt(A, Duration::from_millis(300));
            monitor.record_rtt(B, Duration::from_millis(50));
        }
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let sla = sla(vec![sub(ConsistencyLevel::Eventual, 100, 1.0)]);
        let session = session(&sla);

        let plan = optimizer.find_node_to_read(&session, "0001", &sla);
        assert_eq!(plan.node.as_deref(), Some(B));
    }

    #[test]
    fn test_tie_broken_by_avg_rtt() {
        let monitor = Arc::new(Monitor::new());
        // Both always under the bound; B averages lower.
        for _ in 0..10 {
            monitor.record_rtt(A, Duration::from_millis(80));
            monitor.record_rtt(B, Duration::from_millis(20));
        }
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let sla = sla(vec![sub(ConsistencyLevel::Eventual, 100, 1.0)]);
        let session = session(&sla);

        let plan = optimizer.find_node_to_read(&session, "0001", &sla);
        assert_eq!(plan.node.as_deref(), Some(B));
    }

    #[test]
    fn test_read_my_writes_excludes_stale_secondary() {
        let monitor = Arc::new(Monitor::new());
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let sla = sla(vec![
            sub(ConsistencyLevel::ReadMyWrites, 200, 0.9),
            sub(ConsistencyLevel::Eventual, 200, 0.5),
        ]);
        let mut session = session(&sla);
        session.objects_written.insert("0005".into(), 5000);

        // B has not replicated yet: only the primary can serve RMW.
        let (candidates, min_ts) = optimizer.select_nodes(&session, "0005", &sla.sub_slas[0]);
        assert_eq!(candidates, vec![A.to_string()]);
        assert_eq!(min_ts, 5000);

        // Highest-utility sub is only satisfiable at the primary.
        let plan = optimizer.find_node_to_read(&session, "0005", &sla);
        assert_eq!(plan.node.as_deref(), Some(A));

        // After B catches up it becomes a candidate.
        monitor.record_hts(B, 5000);
        let (candidates, _) = optimizer.select_nodes(&session, "0005", &sla.sub_slas[0]);
        assert_eq!(candidates, vec![A.to_string(), B.to_string()]);
    }

    #[test]
    fn test_monotonic_reads_uses_objects_read() {
        let monitor = Arc::new(Monitor::new());
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let sla = sla(vec![sub(ConsistencyLevel::MonotonicReads, 200, 0.8)]);
        let mut session = session(&sla);
        session.objects_read.insert("0007".into(), 777);

        let (_, min_ts) = optimizer.select_nodes(&session, "0007", &sla.sub_slas[0]);
        assert_eq!(min_ts, 777);

        // Unread key defaults to 0: every replica qualifies.
        let (candidates, min_ts) = optimizer.select_nodes(&session, "0008", &sla.sub_slas[0]);
        assert_eq!(min_ts, 0);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_bounded_min_ts_tracks_clock() {
        let monitor = Arc::new(Monitor::new());
        let optimizer = Optimizer::new(config(), Arc::clone(&monitor));
        let mut bounded = sub(ConsistencyLevel::Bounded, 200, 0.7);
        bounded.staleness_bound = Some(Duration::from_secs(10));
        let sla = sla(vec![bounded]);
        let session = session(&sla);

        let before = now_millis();
        let (_, min_ts) = optimizer.select_nodes(&session, "0001", &sla.sub_slas[0]);
        let after = now_millis();
        assert!(min_ts >= before - 10_000 && min_ts <= after - 10_000);
    }

    #[test]
    fn test_empty_sla_yields_sentinel() {
        let monitor = Arc::new(Monitor::new());
        let optimizer = Optimizer::new(config(), monitor);
        let sla = sla(vec![]);
        let session = session(&sla);

        let plan = optimizer.find_node_to_read(&session, "0001", &sla);
        assert!(plan.node.is_none());
        assert!(plan.target.is_none());
        assert!(plan.min_read_ts.is_empty());
    }
}
