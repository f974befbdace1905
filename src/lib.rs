//! # slakv
//!
//! An SLA-driven, consistency-aware distributed key-value store.
//! Clients declare an ordered list of (consistency, latency, utility)
//! sub-SLAs and the client library routes each read to the replica
//! that maximizes expected utility, based on monitored RTT
//! distributions and per-node replication progress.
//!
//! ## Architecture
//!
//! ```text
//!  ┌──────────────┐  utility-drop reports   ┌──────────────┐
//!  │   Client     │ ───────────────────────▶│ Coordinator  │
//!  │ session ·    │                         │  /report     │
//!  │ monitor ·    │                         └──────┬───────┘
//!  │ optimizer    │                 adjust_replication
//!  └──────┬───────┘                                │
//!         │ get/set (HTTP/JSON)                    ▼
//!  ┌──────▼───────┐     /replicate pulls    ┌──────────────┐
//!  │ Primary node │◀────────────────────────│ Secondary    │
//!  │  shard S     │                         │ node shard S │
//!  └──────────────┘                         └──────────────┘
//! ```
//!
//! Writes go to the single primary of the key's shard and receive a
//! monotonic millisecond timestamp. Secondaries pull updates on a
//! per-shard period and track the highest timestamp they have seen
//! (HighTS); the optimizer compares each secondary's HighTS against
//! the minimum acceptable read timestamp of every consistency level
//! to build candidate sets.

pub mod client;
pub mod common;
pub mod coordinator;
pub mod node;

// Re-export commonly used types
pub use client::{ClientContext, ServerSelectionPolicy, Session};
pub use common::{ConsistencyLevel, Error, ReplicationConfig, Result, Sla, SubSla};
pub use coordinator::Coordinator;
pub use node::StorageNode;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
