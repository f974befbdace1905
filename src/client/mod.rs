//! SLA-aware client library: sessions, monitor, optimizer, and the
//! read/write API.

pub mod api;
pub mod monitor;
pub mod optimizer;
pub mod preload;
pub mod session;

pub use api::{detect_sub_sla_hit, ClientContext, GetOutcome};
pub use monitor::{
    Monitor, ReadStatus, ReportingConfig, SlaStatus, SubSlaStatus, UtilityDropReport,
    MAX_SAMPLES, REPORT_COOLDOWN, UTILITY_DROP_THRESHOLD,
};
pub use optimizer::{Optimizer, ReadPlan};
pub use session::{ServerSelectionPolicy, Session, SessionSummary};
