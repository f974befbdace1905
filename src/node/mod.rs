//! Replicated storage node: versioned store, shard roles, HTTP
//! endpoints, and pull-based replication.

pub mod http;
pub mod replication;
pub mod server;
pub mod shard;
pub mod store;

pub use http::{
    AdjustReplicationRequest, GetResponse, NodeState, ReplicateResponse, SetRequest, SetResponse,
};
pub use server::{build_node_state, StorageNode, HIGH_TS_SNAPSHOT};
pub use shard::{ShardRole, ShardState, TimestampOracle};
pub use store::{MemStore, Record, VersionedStore, VersionedValue};
