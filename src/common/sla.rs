//! SLA types: consistency levels, sub-SLAs, and SLA file loading
//!
//! An SLA is an ordered list of (consistency, latency bound, utility)
//! sub-clauses. Order is the client's preference order: earlier
//! entries are worth more to the application, and the read path
//! always evaluates them in declared order.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Closed set of consistency levels a sub-SLA can demand.
///
/// Unknown strings are rejected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    Eventual,
    MonotonicReads,
    ReadMyWrites,
    Bounded,
    Strong,
}

impl ConsistencyLevel {
    /// Levels whose read predicate is a HighTS comparison against a
    /// minimum acceptable read timestamp.
    pub fn is_hts_based(&self) -> bool {
        matches!(
            self,
            ConsistencyLevel::MonotonicReads
                | ConsistencyLevel::ReadMyWrites
                | ConsistencyLevel::Bounded
        )
    }
}

impl FromStr for ConsistencyLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "eventual" => Ok(ConsistencyLevel::Eventual),
            "monotonicreads" => Ok(ConsistencyLevel::MonotonicReads),
            "readmywrites" => Ok(ConsistencyLevel::ReadMyWrites),
            "bounded" => Ok(ConsistencyLevel::Bounded),
            "strong" => Ok(ConsistencyLevel::Strong),
            other => Err(Error::InvalidConfig(format!(
                "unknown consistency level: {}",
                other
            ))),
        }
    }
}

/// A single consistency-latency-utility clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSla {
    pub consistency: ConsistencyLevel,
    #[serde(with = "millis")]
    pub latency_bound: Duration,
    /// Only meaningful when `consistency` is `Bounded`.
    #[serde(default, with = "opt_millis", skip_serializing_if = "Option::is_none")]
    pub staleness_bound: Option<Duration>,
    pub utility: f64,
}

/// Ordered from most to least preferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    pub id: String,
    #[serde(rename = "subSLAs")]
    pub sub_slas: Vec<SubSla>,
}

impl Sla {
    /// Does any sub-clause require a HighTS-based consistency check?
    pub fn demands_hts(&self) -> bool {
        self.sub_slas.iter().any(|s| s.consistency.is_hts_based())
    }

    /// Load an SLA from a JSON file, assigning it the given id.
    ///
    /// Sub-SLAs are sorted by their declared `rank` ascending, so the
    /// file order is irrelevant.
    pub fn from_file(path: impl AsRef<std::path::Path>, id: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data, id)
    }

    /// Parse an SLA from raw JSON.
    pub fn from_json(data: &str, id: &str) -> Result<Self> {
        let raw: RawSlaFile = serde_json::from_str(data)
            .map_err(|e| Error::InvalidConfig(format!("failed to parse SLA file: {}", e)))?;

        let mut entries = raw.sub_slas;
        entries.sort_by_key(|r| r.rank);

        let mut sub_slas = Vec::with_capacity(entries.len());
        for r in entries {
            let level: ConsistencyLevel = r.consistency.parse()?;
            if !(0.0..=1.0).contains(&r.utility) {
                return Err(Error::InvalidConfig(format!(
                    "utility {} out of range [0, 1]",
                    r.utility
                )));
            }
            let staleness_bound = match (level, r.staleness_bound) {
                (ConsistencyLevel::Bounded, Some(ms)) => Some(Duration::from_millis(ms)),
                _ => None,
            };
            sub_slas.push(SubSla {
                consistency: level,
                latency_bound: Duration::from_millis(r.latency_bound),
                staleness_bound,
                utility: r.utility,
            });
        }

        Ok(Sla {
            id: id.to_string(),
            sub_slas,
        })
    }
}

#[derive(Deserialize)]
struct RawSubSla {
    rank: u32,
    consistency: String,
    latency_bound: u64,
    #[serde(default)]
    staleness_bound: Option<u64>,
    utility: f64,
}

#[derive(Deserialize)]
struct RawSlaFile {
    #[serde(rename = "subSLAs")]
    sub_slas: Vec<RawSubSla>,
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = Option::<u64>::deserialize(d)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOPPING_CART: &str = r#"{
        "subSLAs": [
            {"rank": 2, "consistency": "eventual", "latency_bound": 200, "utility": 0.5},
            {"rank": 1, "consistency": "ReadMyWrites", "latency_bound": 200, "utility": 0.9}
        ]
    }"#;

    #[test]
    fn test_load_sorts_by_rank() {
        let sla = Sla::from_json(SHOPPING_CART, "cart").unwrap();
        assert_eq!(sla.sub_slas.len(), 2);
        assert_eq!(sla.sub_slas[0].consistency, ConsistencyLevel::ReadMyWrites);
        assert_eq!(sla.sub_slas[0].utility, 0.9);
        assert_eq!(sla.sub_slas[1].consistency, ConsistencyLevel::Eventual);
    }

    #[test]
    fn test_consistency_parse_case_insensitive() {
        assert_eq!(
            "MonotonicReads".parse::<ConsistencyLevel>().unwrap(),
            ConsistencyLevel::MonotonicReads
        );
        assert_eq!(
            "STRONG".parse::<ConsistencyLevel>().unwrap(),
            ConsistencyLevel::Strong
        );
    }

    #[test]
    fn test_unknown_consistency_rejected() {
        let bad = r#"{"subSLAs": [
            {"rank": 1, "consistency": "causal", "latency_bound": 100, "utility": 1.0}
        ]}"#;
        assert!(matches!(
            Sla::from_json(bad, "x"),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_utility_out_of_range_rejected() {
        let bad = r#"{"subSLAs": [
            {"rank": 1, "consistency": "strong", "latency_bound": 100, "utility": 1.5}
        ]}"#;
        assert!(Sla::from_json(bad, "x").is_err());
    }

    #[test]
    fn test_staleness_only_kept_for_bounded() {
        let raw = r#"{"subSLAs": [
            {"rank": 1, "consistency": "bounded", "latency_bound": 100, "staleness_bound": 3000, "utility": 1.0},
            {"rank": 2, "consistency": "eventual", "latency_bound": 100, "staleness_bound": 3000, "utility": 0.5}
        ]}"#;
        let sla = Sla::from_json(raw, "x").unwrap();
        assert_eq!(sla.sub_slas[0].staleness_bound, Some(Duration::from_secs(3)));
        assert_eq!(sla.sub_slas[1].staleness_bound, None);
    }

    #[test]
    fn test_sub_sla_wire_shape() {
        let sub = SubSla {
            consistency: ConsistencyLevel::ReadMyWrites,
            latency_bound: Duration::from_millis(200),
            staleness_bound: None,
            utility: 0.9,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["consistency"], "readmywrites");
        assert_eq!(json["latency_bound"], 200);
    }
}
