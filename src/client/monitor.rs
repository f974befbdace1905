//! Client-side monitor: RTT windows, HighTS tracking, utilities
//!
//! One monitor per client context. Writers take the outer read-write
//! lock on the map of windows plus the per-window inner lock; readers
//! copy samples under the inner lock and compute after releasing it.
//! The outer lock is never held across network I/O: utility-drop
//! reports are assembled under the locks, then posted from a spawned
//! task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::common::{Sla, SubSla};

/// Sliding-window size for RTT and utility samples.
pub const MAX_SAMPLES: usize = 100;

/// Average utility below this triggers a drop report.
pub const UTILITY_DROP_THRESHOLD: f64 = 0.6;

/// Minimum gap between two drop reports from one client.
pub const REPORT_COOLDOWN: Duration = Duration::from_secs(2);

/// Fixed-size ring buffer: `index` is the next write position, `full`
/// latches on first wrap-around. Valid length is `MAX_SAMPLES` when
/// full, `index` otherwise.
struct Window<T: Copy> {
    samples: Vec<T>,
    index: usize,
    full: bool,
}

impl<T: Copy + Default> Window<T> {
    fn new() -> Self {
        Self {
            samples: vec![T::default(); MAX_SAMPLES],
            index: 0,
            full: false,
        }
    }

    fn push(&mut self, sample: T) {
        self.samples[self.index] = sample;
        self.index = (self.index + 1) % MAX_SAMPLES;
        if self.index == 0 {
            self.full = true;
        }
    }

    /// Valid samples, oldest first.
    fn snapshot(&self) -> Vec<T> {
        if self.full {
            let mut out = Vec::with_capacity(MAX_SAMPLES);
            out.extend_from_slice(&self.samples[self.index..]);
            out.extend_from_slice(&self.samples[..self.index]);
            out
        } else {
            self.samples[..self.index].to_vec()
        }
    }

    fn is_empty(&self) -> bool {
        !self.full && self.index == 0
    }
}

/// Post-hoc status of one sub-SLA for one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaStatus {
    Met,
    #[serde(rename = "Lat_Not_Met")]
    LatencyNotMet,
    #[serde(rename = "Consistency_Not_Met")]
    ConsistencyNotMet,
    #[serde(rename = "NA")]
    NotApplicable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubSlaStatus {
    pub sub_sla: SubSla,
    pub status: SlaStatus,
}

/// Full outcome of one read: the node contacted and the status of
/// every sub-SLA in rank order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadStatus {
    pub node: String,
    pub summary: Vec<SubSlaStatus>,
}

impl ReadStatus {
    /// Deterministic serialization used as the histogram key. Field
    /// and entry order are fixed, so equal outcomes collide.
    pub fn canonical_key(&self) -> String {
        serde_json::to_string(self).expect("read status serializes")
    }
}

/// Report sent to the reconfiguration coordinator when the observed
/// utility drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilityDropReport {
    pub client_id: String,
    pub region: String,
    #[serde(rename = "utility")]
    pub avg_utility: f64,
    pub sla: Sla,
    pub histogram: HashMap<String, u64>,
    /// Per-node average RTT in milliseconds.
    pub rtts: HashMap<String, f64>,
}

/// Settings for dynamic coordination. Absent = reporting disabled.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub client_id: String,
    pub region: String,
    pub sla: Sla,
    pub coordinator_url: String,
}

struct ReportingState {
    config: ReportingConfig,
    http: reqwest::Client,
    last_report: Option<Instant>,
}

/// Per-client monitor.
pub struct Monitor {
    rtts: RwLock<HashMap<String, Arc<Mutex<Window<Duration>>>>>,
    hts: RwLock<HashMap<String, i64>>,
    utilities: Mutex<Window<f64>>,
    histogram: Mutex<HashMap<String, u64>>,
    reporting: Mutex<Option<ReportingState>>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            rtts: RwLock::new(HashMap::new()),
            hts: RwLock::new(HashMap::new()),
            utilities: Mutex::new(Window::new()),
            histogram: Mutex::new(HashMap::new()),
            reporting: Mutex::new(None),
        }
    }

    /// Append an RTT sample for `node`, creating its window on first
    /// use.
    pub fn record_rtt(&self, node: &str, rtt: Duration) {
        let window = {
            let mut map = self.rtts.write().unwrap();
            Arc::clone(
                map.entry(node.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(Window::new()))),
            )
        };
        window.lock().unwrap().push(rtt);
    }

    /// Overwrite the last observed HighTS for `node`. Stale
    /// observations are tolerated; values arrive from successful
    /// reads only.
    pub fn record_hts(&self, node: &str, ts: i64) {
        self.hts.write().unwrap().insert(node.to_string(), ts);
    }

    /// Last observed HighTS for `node`, 0 if never seen.
    pub fn hts(&self, node: &str) -> i64 {
        self.hts.read().unwrap().get(node).copied().unwrap_or(0)
    }

    /// Append a utility sample and, if reporting is enabled, check
    /// the drop predicate.
    pub fn record_utility(&self, utility: f64) {
        self.utilities.lock().unwrap().push(utility);
        self.maybe_report_drop();
    }

    /// Bump the histogram counter for a read outcome.
    pub fn record_read_status(&self, status: &ReadStatus) {
        let key = status.canonical_key();
        *self.histogram.lock().unwrap().entry(key).or_insert(0) += 1;
    }

    /// Copy of a node's valid RTT samples, oldest first.
    pub fn rtt_samples(&self, node: &str) -> Vec<Duration> {
        let window = {
            let map = self.rtts.read().unwrap();
            match map.get(node) {
                Some(w) => Arc::clone(w),
                None => return Vec::new(),
            }
        };
        let guard = window.lock().unwrap();
        guard.snapshot()
    }

    /// Arithmetic mean RTT over valid samples; zero if none.
    pub fn avg_rtt(&self, node: &str) -> Duration {
        let samples = self.rtt_samples(node);
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    /// The node with the lowest average RTT among nodes with at least
    /// one sample.
    pub fn lowest_avg_rtt_node(&self) -> Option<(String, Duration)> {
        let windows: Vec<(String, Arc<Mutex<Window<Duration>>>)> = {
            let map = self.rtts.read().unwrap();
            map.iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        let mut best: Option<(String, Duration)> = None;
        for (node, window) in windows {
            let samples = window.lock().unwrap().snapshot();
            if samples.is_empty() {
                continue;
            }
            let avg = samples.iter().sum::<Duration>() / samples.len() as u32;
            match &best {
                Some((_, min)) if avg >= *min => {}
                _ => best = Some((node, avg)),
            }
        }
        best
    }

    /// Fraction of valid samples at or below `threshold`. With no
    /// samples, an optimistic caller assumes the node is fast (1.0),
    /// a pessimistic one assumes it is not (0.0).
    pub fn probability_rtt_below(&self, node: &str, threshold: Duration, optimistic: bool) -> f64 {
        let samples = self.rtt_samples(node);
        if samples.is_empty() {
            return if optimistic { 1.0 } else { 0.0 };
        }
        let below = samples.iter().filter(|s| **s <= threshold).count();
        below as f64 / samples.len() as f64
    }

    /// Copy of the utility window, oldest first.
    pub fn utilities(&self) -> Vec<f64> {
        self.utilities.lock().unwrap().snapshot()
    }

    /// Copy of the read-outcome histogram.
    pub fn histogram_snapshot(&self) -> HashMap<String, u64> {
        self.histogram.lock().unwrap().clone()
    }

    /// Average RTT in milliseconds for every node with samples.
    pub fn avg_rtt_millis(&self) -> HashMap<String, f64> {
        let nodes: Vec<String> = {
            let map = self.rtts.read().unwrap();
            map.keys().cloned().collect()
        };
        nodes
            .into_iter()
            .filter_map(|node| {
                let samples = self.rtt_samples(&node);
                if samples.is_empty() {
                    return None;
                }
                let total: Duration = samples.iter().sum();
                let avg_ms = total.as_secs_f64() * 1000.0 / samples.len() as f64;
                Some((node, avg_ms))
            })
            .collect()
    }

    /// Turn on utility-drop reporting to the coordinator.
    pub fn enable_reporting(&self, config: ReportingConfig, http: reqwest::Client) {
        *self.reporting.lock().unwrap() = Some(ReportingState {
            config,
            http,
            last_report: None,
        });
    }

    /// Average utility over non-zero window entries. Zeros are
    /// excluded so cold windows do not pin the average down; an
    /// all-zero window averages to 0.
    pub fn filtered_avg_utility(&self) -> Option<f64> {
        let samples = self.utilities();
        if samples.is_empty() {
            return None;
        }
        let nonzero: Vec<f64> = samples.into_iter().filter(|u| *u != 0.0).collect();
        if nonzero.is_empty() {
            return Some(0.0);
        }
        Some(nonzero.iter().sum::<f64>() / nonzero.len() as f64)
    }

    /// Evaluate the drop predicate and, when it fires, post a report
    /// from a spawned task. Must be called from a tokio runtime when
    /// reporting is enabled. Rate-limited to one report per
    /// `REPORT_COOLDOWN`.
    pub fn maybe_report_drop(&self) {
        let Some(avg) = self.filtered_avg_utility() else {
            return;
        };
        if avg >= UTILITY_DROP_THRESHOLD {
            return;
        }

        // Assemble everything before releasing the reporting lock;
        // the POST itself happens outside all monitor locks.
        let (report, url, http) = {
            let mut guard = self.reporting.lock().unwrap();
            let Some(state) = guard.as_mut() else {
                return;
            };
            if let Some(last) = state.last_report {
                if last.elapsed() < REPORT_COOLDOWN {
                    return;
                }
            }
            state.last_report = Some(Instant::now());

            let report = UtilityDropReport {
                client_id: state.config.client_id.clone(),
                region: state.config.region.clone(),
                avg_utility: avg,
                sla: state.config.sla.clone(),
                histogram: self.histogram_snapshot(),
                rtts: self.avg_rtt_millis(),
            };
            (report, state.config.coordinator_url.clone(), state.http.clone())
        };

        tokio::spawn(async move {
            match http.post(&url).json(&report).send().await {
                Ok(resp) => {
                    tracing::debug!(status = %resp.status(), "utility drop report sent");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to send utility drop report");
                }
            }
        });
    }
}
