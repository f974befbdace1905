//! Common types shared across slakv

pub mod config;
pub mod error;
pub mod sla;
pub mod time;

pub use config::{
    load_client_config, ClientCoordinatorConfig, NodeInfo, ReplicationConfig, ShardConfig,
};
pub use error::{Error, Result};
pub use sla::{ConsistencyLevel, Sla, SubSla};
pub use time::{now_millis, TS_NOT_APPLICABLE};
