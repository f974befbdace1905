//! Versioned key-value storage for a storage node
//!
//! Every record carries the timestamp the primary assigned on write;
//! replication preserves it. The engine is deliberately small: a
//! per-node versioned map with a numeric range scan is all the
//! replication protocol needs.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A record as it travels on the wire and sits in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub value: String,
    pub timestamp: i64,
}

/// A stored value plus its immutable write timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: String,
    pub timestamp: i64,
}

/// Storage engine API used by the storage node.
pub trait VersionedStore: Send + Sync + 'static {
    /// Read the current value and timestamp for `key`.
    fn get(&self, key: &str) -> Option<VersionedValue>;

    /// Write `value` at `timestamp`, overwriting any prior version.
    ///
    /// Used both for primary writes (timestamp freshly issued) and
    /// replication writes (timestamp preserved from the primary).
    fn set(&self, key: &str, value: String, timestamp: i64);

    /// All records with numeric key in `[start, end]` and timestamp
    /// strictly greater than `since`, ordered by timestamp.
    fn scan_updates(&self, since: i64, start: i64, end: i64) -> Vec<Record>;

    /// Number of stored keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory `VersionedStore` backed by a hash map.
#[derive(Default)]
pub struct MemStore {
    map: RwLock<HashMap<String, VersionedValue>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionedStore for MemStore {
    fn get(&self, key: &str) -> Option<VersionedValue> {
        self.map.read().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: String, timestamp: i64) {
        self.map
            .write()
            .unwrap()
            .insert(key.to_string(), VersionedValue { value, timestamp });
    }

    fn scan_updates(&self, since: i64, start: i64, end: i64) -> Vec<Record> {
        let guard = self.map.read().unwrap();
        let mut updates: Vec<Record> = guard
            .iter()
            .filter_map(|(key, vv)| {
                let numeric: i64 = key.parse().ok()?;
                if numeric >= start && numeric <= end && vv.timestamp > since {
                    Some(Record {
                        key: key.clone(),
                        value: vv.value.clone(),
                        timestamp: vv.timestamp,
                    })
                } else {
                    None
                }
            })
            .collect();
        updates.sort_by_key(|r| r.timestamp);
        updates
    }

    fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }
}
