//! Reconfiguration coordinator
//!
//! Clients report utility drops; the coordinator classifies the
//! dominant read-outcome pattern and, when latency misses on a
//! session-consistency level are traced to a shard primary, halves
//! the pull period of the secondary closest to the reporting client.

pub mod analysis;
pub mod http;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::common::{ReplicationConfig, Result};
use crate::coordinator::http::create_router;

/// Reports from the same (client, region) within this window are
/// dropped.
pub const REPORT_COOLDOWN: Duration = Duration::from_secs(2);

/// Pull periods are never pushed below this many seconds.
pub const MIN_REPLICATION_PERIOD: f64 = 5.0;

/// Shared coordinator state.
pub struct CoordinatorState {
    pub config: Arc<ReplicationConfig>,
    /// "client-region" → last accepted report.
    last_report: Mutex<HashMap<String, Instant>>,
    /// secondary address → last reconfiguration sent.
    last_adjustment: Mutex<HashMap<String, Instant>>,
    /// (shard id, secondary address) → current pull period, seconds.
    periods: Mutex<HashMap<(u64, String), f64>>,
}

impl CoordinatorState {
    pub fn new(config: Arc<ReplicationConfig>) -> Self {
        let mut periods = HashMap::new();
        for shard in &config.shards {
            for secondary in &shard.secondaries {
                periods.insert((shard.id, secondary.clone()), shard.default_rep_freq);
            }
        }
        Self {
            config,
            last_report: Mutex::new(HashMap::new()),
            last_adjustment: Mutex::new(HashMap::new()),
            periods: Mutex::new(periods),
        }
    }

    /// Accept a report if the (client, region) cooldown allows it.
    pub(crate) fn admit_report(&self, client_id: &str, region: &str) -> bool {
        let key = format!("{}-{}", client_id, region);
        let mut last = self.last_report.lock().unwrap();
        if let Some(prev) = last.get(&key) {
            if prev.elapsed() < REPORT_COOLDOWN {
                return false;
            }
        }
        last.insert(key, Instant::now());
        true
    }

    /// Current pull period for a secondary, falling back to the
    /// shard's configured default.
    pub fn current_period(&self, shard_id: u64, secondary: &str) -> f64 {
        let default = self
            .config
            .shards
            .iter()
            .find(|s| s.id == shard_id)
            .map(|s| s.default_rep_freq)
            .unwrap_or(MIN_REPLICATION_PERIOD);
        self.periods
            .lock()
            .unwrap()
            .get(&(shard_id, secondary.to_string()))
            .copied()
            .unwrap_or(default)
    }

    pub(crate) fn adjustment_in_cooldown(&self, secondary: &str, period: f64) -> bool {
        let last = self.last_adjustment.lock().unwrap();
        match last.get(secondary) {
            Some(prev) => prev.elapsed() < Duration::from_secs_f64(period * 1.5),
            None => false,
        }
    }

    pub(crate) fn record_adjustment(&self, shard_id: u64, secondary: &str, period: f64) {
        self.periods
            .lock()
            .unwrap()
            .insert((shard_id, secondary.to_string()), period);
        self.last_adjustment
            .lock()
            .unwrap()
            .insert(secondary.to_string(), Instant::now());
    }
}

pub struct Coordinator {
    state: Arc<CoordinatorState>,
}

impl Coordinator {
    pub fn new(config: Arc<ReplicationConfig>) -> Self {
        Self {
            state: Arc::new(CoordinatorState::new(config)),
        }
    }

    /// Bind `addr` and serve `/report` until the task is dropped.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    pub async fn serve_on(self, listener: tokio::net::TcpListener) -> Result<()> {
        tracing::info!("Coordinator listening on {}", listener.local_addr()?);
        let router = create_router(self.state);
        axum::serve(listener, router).await?;
        Ok(())
    }
}
