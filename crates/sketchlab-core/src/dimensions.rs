use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Query,
    Merge,
}

impl Mode {
    pub const ALL: [Mode; 2] = [Mode::Query, Mode::Merge];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Query => "query",
            Mode::Merge => "merge",
        }
    }
}

/// Which measurement binary family an algorithm belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// The hyperloglog variants built in-house.
    Sketch,
    /// Hashing only, no sketch representation.
    Baseline,
    /// Apache DataSketches.
    DataSketches,
    /// Google ZetaSketch (JVM).
    ZetaSketch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "hyperloglog")]
    HyperLogLog,
    #[serde(rename = "hyperloglogzstd")]
    HyperLogLogZstd,
    #[serde(rename = "hyperlogloglog")]
    HyperLogLogLog,
    #[serde(rename = "hyperloglogloga")]
    HyperLogLogLogAppendOnly,
    #[serde(rename = "hyperlogloglogi")]
    HyperLogLogLogIncreaseOnly,
    #[serde(rename = "hyperlogloglogai")]
    HyperLogLogLogAppendIncreaseOnly,
    #[serde(rename = "hyperlogloglogb")]
    HyperLogLogLogBottom,
    #[serde(rename = "hashonly")]
    HashOnly,
    #[serde(rename = "apache-hll4")]
    ApacheHll4,
    #[serde(rename = "apache-hll6")]
    ApacheHll6,
    #[serde(rename = "apache-hll8")]
    ApacheHll8,
    #[serde(rename = "apache-cpc")]
    ApacheCpc,
    #[serde(rename = "zetasketch")]
    ZetaSketch,
}

impl Algorithm {
    pub const ALL: [Algorithm; 13] = [
        Algorithm::HyperLogLog,
        Algorithm::HyperLogLogZstd,
        Algorithm::HyperLogLogLog,
        Algorithm::HyperLogLogLogAppendOnly,
        Algorithm::HyperLogLogLogIncreaseOnly,
        Algorithm::HyperLogLogLogAppendIncreaseOnly,
        Algorithm::HyperLogLogLogBottom,
        Algorithm::HashOnly,
        Algorithm::ApacheHll4,
        Algorithm::ApacheHll6,
        Algorithm::ApacheHll8,
        Algorithm::ApacheCpc,
        Algorithm::ZetaSketch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::HyperLogLog => "hyperloglog",
            Algorithm::HyperLogLogZstd => "hyperloglogzstd",
            Algorithm::HyperLogLogLog => "hyperlogloglog",
            Algorithm::HyperLogLogLogAppendOnly => "hyperloglogloga",
            Algorithm::HyperLogLogLogIncreaseOnly => "hyperlogloglogi",
            Algorithm::HyperLogLogLogAppendIncreaseOnly => "hyperlogloglogai",
            Algorithm::HyperLogLogLogBottom => "hyperlogloglogb",
            Algorithm::HashOnly => "hashonly",
            Algorithm::ApacheHll4 => "apache-hll4",
            Algorithm::ApacheHll6 => "apache-hll6",
            Algorithm::ApacheHll8 => "apache-hll8",
            Algorithm::ApacheCpc => "apache-cpc",
            Algorithm::ZetaSketch => "zetasketch",
        }
    }

    pub fn family(self) -> Family {
        match self {
            Algorithm::HashOnly => Family::Baseline,
            Algorithm::ApacheHll4
            | Algorithm::ApacheHll6
            | Algorithm::ApacheHll8
            | Algorithm::ApacheCpc => Family::DataSketches,
            Algorithm::ZetaSketch => Family::ZetaSketch,
            _ => Family::Sketch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Datatype {
    /// Unsigned 64-bit integers.
    #[serde(rename = "uint64")]
    UInt64,
    /// Random fixed-length strings.
    #[serde(rename = "str")]
    RandomString,
    /// Structured records, consumable only by the sketch family.
    #[serde(rename = "jr")]
    StructuredRecord,
}

impl Datatype {
    pub const ALL: [Datatype; 3] = [
        Datatype::UInt64,
        Datatype::RandomString,
        Datatype::StructuredRecord,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Datatype::UInt64 => "uint64",
            Datatype::RandomString => "str",
            Datatype::StructuredRecord => "jr",
        }
    }

    /// Position in the catalog; the seed counter nests on it.
    pub fn ordinal(self) -> usize {
        match self {
            Datatype::UInt64 => 0,
            Datatype::RandomString => 1,
            Datatype::StructuredRecord => 2,
        }
    }
}

fn catalog<T: Copy>(all: &[T], name: impl Fn(T) -> &'static str) -> String {
    all.iter().map(|v| name(*v)).collect::<Vec<_>>().join(", ")
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownMode(s.to_string(), catalog(&Mode::ALL, Mode::as_str)))
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| {
                ConfigError::UnknownAlgorithm(s.to_string(), catalog(&Algorithm::ALL, Algorithm::as_str))
            })
    }
}

impl FromStr for Datatype {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Datatype::ALL
            .into_iter()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| {
                ConfigError::UnknownDatatype(s.to_string(), catalog(&Datatype::ALL, Datatype::as_str))
            })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip_through_from_str() {
        for algo in Algorithm::ALL {
            assert_eq!(algo.as_str().parse::<Algorithm>().expect("parse"), algo);
        }
        assert_eq!("merge".parse::<Mode>().expect("mode"), Mode::Merge);
        assert_eq!("jr".parse::<Datatype>().expect("dt"), Datatype::StructuredRecord);
    }

    #[test]
    fn unknown_names_list_the_catalog() {
        let err = "hll".parse::<Algorithm>().expect_err("should reject");
        let msg = err.to_string();
        assert!(msg.contains("apache-cpc"), "catalog missing from: {}", msg);
        assert!("u64".parse::<Datatype>().is_err());
        assert!("Query".parse::<Mode>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        let v = serde_json::to_value(Algorithm::ApacheHll4).expect("serialize");
        assert_eq!(v, serde_json::json!("apache-hll4"));
        let dt: Datatype = serde_json::from_str("\"str\"").expect("deserialize");
        assert_eq!(dt, Datatype::RandomString);
    }

    #[test]
    fn families_partition_the_catalog() {
        let sketches: Vec<_> = Algorithm::ALL
            .into_iter()
            .filter(|a| a.family() == Family::Sketch)
            .collect();
        assert_eq!(sketches.len(), 7);
        assert!(sketches.iter().all(|a| a.as_str().starts_with("hyperloglog")));
        assert_eq!(Algorithm::HashOnly.family(), Family::Baseline);
        assert_eq!(Algorithm::ZetaSketch.family(), Family::ZetaSketch);
    }
}
