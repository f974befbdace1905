//! Report analysis and replication reconfiguration
//!
//! The dominant histogram entry is the read-outcome pattern the
//! client saw most often. If it shows latency misses on a
//! HighTS-based consistency level while reads were pinned to a shard
//! primary, a faster-replicating nearby secondary could serve those
//! reads instead; the coordinator halves that secondary's pull
//! period, bounded below by `MIN_REPLICATION_PERIOD`.

use std::cmp::Ordering;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::client::monitor::{ReadStatus, SlaStatus, UtilityDropReport};
use crate::coordinator::{CoordinatorState, MIN_REPLICATION_PERIOD};
use crate::node::http::AdjustReplicationRequest;

static HTTP: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(2))
        .build()
        .expect("default reqwest client")
});

pub async fn analyze_report(state: Arc<CoordinatorState>, report: UtilityDropReport) {
    // Dominant pattern; ties broken by key so analysis is
    // deterministic.
    let Some((dominant_key, _)) = report
        .histogram
        .iter()
        .max_by(|(k1, c1), (k2, c2)| c1.cmp(c2).then_with(|| k2.cmp(k1)))
    else {
        tracing::info!("no histogram pattern in report");
        return;
    };

    let status: ReadStatus = match serde_json::from_str(dominant_key) {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(error = %e, "failed to parse histogram key");
            return;
        }
    };

    for entry in &status.summary {
        if entry.status != SlaStatus::LatencyNotMet || !entry.sub_sla.consistency.is_hts_based() {
            continue;
        }
        // Only actionable when the offending node is the primary of
        // the shard of interest: those reads could have gone to a
        // secondary, had one been fresh enough.
        let Some(shard) = state.config.shard_with_primary_address(&status.node) else {
            continue;
        };

        tracing::info!(
            client = %report.client_id,
            node = %status.node,
            shard = shard.id,
            consistency = ?entry.sub_sla.consistency,
            "reconfiguration candidate"
        );

        let Some(closest) = closest_secondary(&report, &status.node) else {
            tracing::info!("no secondary RTT in report; nothing to adjust");
            return;
        };

        let current = state.current_period(shard.id, &closest);
        if current <= MIN_REPLICATION_PERIOD {
            tracing::info!(
                secondary = %closest,
                period_secs = current,
                "pull period already at floor"
            );
            return;
        }
        if state.adjustment_in_cooldown(&closest, current) {
            tracing::debug!(secondary = %closest, "adjustment skipped: cooldown");
            return;
        }

        let new_freq = current * 0.5;
        tracing::info!(
            secondary = %closest,
            from_secs = current,
            to_secs = new_freq,
            "requesting replication speed-up"
        );

        let body = AdjustReplicationRequest {
            shard_id: shard.id,
            new_freq,
        };
        let url = format!("http://{}/adjust_replication", closest);
        match HTTP.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                state.record_adjustment(shard.id, &closest, new_freq);
                tracing::info!(secondary = %closest, "replication adjustment acknowledged");
            }
            Ok(resp) => {
                tracing::warn!(
                    secondary = %closest,
                    status = %resp.status(),
                    "replication adjustment rejected"
                );
            }
            Err(e) => {
                tracing::warn!(secondary = %closest, error = %e, "failed to contact secondary");
            }
        }
        break;
    }
}

/// The node with the smallest reported RTT, excluding the primary.
fn closest_secondary(report: &UtilityDropReport, primary: &str) -> Option<String> {
    report
        .rtts
        .iter()
        .filter(|(node, _)| node.as_str() != primary)
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(node, _)| node.clone())
}
