//! Client sessions
//!
//! A session scopes the state that session-level consistency
//! guarantees need: the timestamps of objects written and read so
//! far, plus the utilities earned by each read. Sessions are owned by
//! a single caller; nothing here is shared across threads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::common::Sla;

/// How a Get picks its target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerSelectionPolicy {
    /// Utility-maximizing selection via the optimizer.
    Pileus,
    /// Uniformly random node.
    Random,
    /// Always the shard primary.
    Primary,
    /// The node with the lowest observed average RTT.
    Closest,
}

pub struct Session {
    pub default_sla: Sla,
    pub policy: ServerSelectionPolicy,
    /// key → timestamp returned by the primary on the session's last
    /// successful write of that key.
    pub objects_written: HashMap<String, i64>,
    /// key → object timestamp of the session's last successful read.
    pub objects_read: HashMap<String, i64>,
    /// Utility earned by each read, in order. 0 marks an SLA miss.
    pub utilities: Vec<f64>,
}

/// What a finished session earned.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Mean over all utility samples, zeros included.
    pub avg_utility: f64,
    pub reads: usize,
    pub writes: usize,
}

impl Session {
    pub fn new(default_sla: Sla, policy: ServerSelectionPolicy) -> Self {
        Self {
            default_sla,
            policy,
            objects_written: HashMap::new(),
            objects_read: HashMap::new(),
            utilities: Vec::new(),
        }
    }

    /// Summarize and clear the session's accumulated state.
    pub fn finish(&mut self) -> SessionSummary {
        let avg_utility = if self.utilities.is_empty() {
            0.0
        } else {
            self.utilities.iter().sum::<f64>() / self.utilities.len() as f64
        };
        let summary = SessionSummary {
            avg_utility,
            reads: self.objects_read.len(),
            writes: self.objects_written.len(),
        };
        self.objects_written.clear();
        self.objects_read.clear();
        self.utilities.clear();
        summary
    }
}
