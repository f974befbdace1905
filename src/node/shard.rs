//! Per-shard runtime state on a storage node
//!
//! Each shard a node participates in gets a `ShardState`: the node's
//! role, the shard-level HighTS, and (for secondaries) the current
//! pull period. HighTS updates are serialized per shard: the set
//! handler is the only writer on a primary, the pull loop the only
//! writer on a secondary.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{now_millis, Result, ShardConfig};

/// This node's role for one shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardRole {
    Primary,
    Secondary,
}

/// Runtime state for one shard on one node.
pub struct ShardState {
    pub meta: ShardConfig,
    pub role: ShardRole,
    high_ts: Mutex<i64>,
    pull_period: Mutex<Duration>,
}

impl ShardState {
    pub fn new(meta: ShardConfig, role: ShardRole) -> Self {
        let period = Duration::from_secs_f64(meta.default_rep_freq);
        Self {
            meta,
            role,
            high_ts: Mutex::new(0),
            pull_period: Mutex::new(period),
        }
    }

    /// Current HighTS for this shard as seen by this node.
    pub fn high_ts(&self) -> i64 {
        *self.high_ts.lock().unwrap()
    }

    /// Advance HighTS to `ts` if it is newer. Monotonic.
    pub fn advance_high_ts(&self, ts: i64) {
        let mut guard = self.high_ts.lock().unwrap();
        if ts > *guard {
            *guard = ts;
        }
    }

    /// Seed HighTS from a persisted snapshot. Startup only.
    pub fn seed_high_ts(&self, ts: i64) {
        *self.high_ts.lock().unwrap() = ts;
    }

    /// Current pull period. Re-read by the pull loop every cycle so
    /// reconfiguration takes effect on the next iteration.
    pub fn pull_period(&self) -> Duration {
        *self.pull_period.lock().unwrap()
    }

    pub fn set_pull_period(&self, period: Duration) {
        *self.pull_period.lock().unwrap() = period;
    }
}

/// Monotonic put-timestamp generator for a primary.
///
/// Returns wall-clock milliseconds, advanced by one on collision so
/// consecutive puts never share a timestamp.
#[derive(Default)]
pub struct TimestampOracle {
    last: Mutex<i64>,
}

impl TimestampOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let mut last = self.last.lock().unwrap();
        let now = now_millis();
        *last = if now > *last { now } else { *last + 1 };
        *last
    }
}

/// Write `{shardId: HighTS}` for every shard to `path` as JSON.
pub fn save_high_ts_snapshot(
    path: impl AsRef<Path>,
    shards: &HashMap<u64, Arc<ShardState>>,
) -> Result<()> {
    let snapshot: HashMap<u64, i64> = shards
        .iter()
        .map(|(id, state)| (*id, state.high_ts()))
        .collect();
    let data = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Load a HighTS snapshot. A missing file is an empty snapshot, not
/// an error: first boot has nothing to restore.
pub fn load_high_ts_snapshot(path: impl AsRef<Path>) -> Result<HashMap<u64, i64>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
