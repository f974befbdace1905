//! Cluster configuration for slakv components
//!
//! The replication config describes the node set and the shard
//! partition: numeric key ranges, the single primary per shard, the
//! ordered secondaries, and the default pull period. Secondary ids
//! are resolved to addresses right after load; the resolved form is
//! the only one the rest of the crate sees.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// A storage node: stable id plus its HTTP address for this
/// configuration epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    #[serde(rename = "nodeId")]
    pub id: String,
    #[serde(rename = "nodeAddress")]
    pub address: String,
}

/// One shard of the key space: inclusive numeric range, one primary,
/// ordered secondaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub id: u64,
    #[serde(rename = "start")]
    pub range_start: i64,
    #[serde(rename = "end")]
    pub range_end: i64,
    /// Primary address.
    pub primary: String,
    #[serde(rename = "primaryID")]
    pub primary_id: String,
    #[serde(rename = "secondaryIDs")]
    pub secondary_ids: Vec<String>,
    /// Resolved secondary addresses, in `secondary_ids` order.
    #[serde(skip)]
    pub secondaries: Vec<String>,
    /// Default replication pull period for secondaries, in seconds.
    #[serde(rename = "defaultRepFreq")]
    pub default_rep_freq: f64,
}

impl ShardConfig {
    /// Does this shard's key range contain the numeric key?
    pub fn contains(&self, key: i64) -> bool {
        key >= self.range_start && key <= self.range_end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub nodes: Vec<NodeInfo>,
    pub shards: Vec<ShardConfig>,
}

impl ReplicationConfig {
    /// Load from a JSON file, resolving secondary ids to addresses.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let mut config: ReplicationConfig = serde_json::from_str(&data)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.resolve()?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve each shard's `secondary_ids` to addresses.
    pub fn resolve(&mut self) -> Result<()> {
        let by_id: HashMap<&str, &str> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), n.address.as_str()))
            .collect();

        for shard in &mut self.shards {
            let mut addrs = Vec::with_capacity(shard.secondary_ids.len());
            for sec_id in &shard.secondary_ids {
                let addr = by_id.get(sec_id.as_str()).ok_or_else(|| {
                    Error::InvalidConfig(format!("unknown secondary id: {}", sec_id))
                })?;
                addrs.push(addr.to_string());
            }
            shard.secondaries = addrs;
        }
        Ok(())
    }

    /// Structural checks: a node is primary for at most one shard,
    /// ranges are well-formed, periods are positive.
    pub fn validate(&self) -> Result<()> {
        let mut primaries: HashMap<&str, u64> = HashMap::new();
        for shard in &self.shards {
            if shard.range_start > shard.range_end {
                return Err(Error::InvalidConfig(format!(
                    "shard {} has inverted range [{}, {}]",
                    shard.id, shard.range_start, shard.range_end
                )));
            }
            if shard.default_rep_freq <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "shard {} has non-positive replication period",
                    shard.id
                )));
            }
            if let Some(prev) = primaries.insert(shard.primary_id.as_str(), shard.id) {
                return Err(Error::InvalidConfig(format!(
                    "node {} is primary for shards {} and {}",
                    shard.primary_id, prev, shard.id
                )));
            }
        }
        Ok(())
    }

    /// The unique shard whose range contains `key`.
    ///
    /// Keys outside every shard violate a config invariant and are
    /// fatal, as is a non-numeric key.
    pub fn shard_for_key(&self, key: &str) -> &ShardConfig {
        let numeric: i64 = key
            .parse()
            .unwrap_or_else(|_| panic!("non-numeric key: {:?}", key));
        self.shards
            .iter()
            .find(|s| s.contains(numeric))
            .unwrap_or_else(|| panic!("no shard found for key: {}", numeric))
    }

    /// Address for a node id, if configured.
    pub fn node_address(&self, id: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.address.as_str())
    }

    /// The shard this node is primary for, if any.
    pub fn primary_shard_of(&self, node_id: &str) -> Option<&ShardConfig> {
        self.shards.iter().find(|s| s.primary_id == node_id)
    }

    /// All shards this node is a secondary for.
    pub fn secondary_shards_of(&self, node_id: &str) -> Vec<&ShardConfig> {
        self.shards
            .iter()
            .filter(|s| s.secondary_ids.iter().any(|id| id == node_id))
            .collect()
    }

    /// The shard a node address is primary for, if any.
    pub fn shard_with_primary_address(&self, address: &str) -> Option<&ShardConfig> {
        self.shards.iter().find(|s| s.primary == address)
    }
}

/// Per-region client coordination settings: which coordinator a
/// client in that region reports utility drops to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCoordinatorConfig {
    pub client_id: String,
    pub region: String,
    #[serde(rename = "reconfiguration_coordinator_url")]
    pub coordinator_url: String,
}

/// Load the region → coordinator map and select one region's entry.
pub fn load_client_config(path: impl AsRef<Path>, region: &str) -> Result<ClientCoordinatorConfig> {
    let data = std::fs::read_to_string(path)?;
    let all: HashMap<String, ClientCoordinatorConfig> = serde_json::from_str(&data)
        .map_err(|e| Error::InvalidConfig(format!("failed to parse client config: {}", e)))?;
    all.get(region)
        .cloned()
        .ok_or_else(|| Error::InvalidConfig(format!("region {:?} not found in client config", region)))
}
