//! Command line of one trial: the input generator piped into the
//! algorithm's measurement binary, run under `/bin/bash -c`.

use serde::{Deserialize, Serialize};
use sketchlab_core::{Algorithm, Datatype, Instance};

pub const GENERATOR: &str = "inputgenerator/inputgenerator";
pub const SKETCH_MEASURE: &str = "hyperlogloglog/measure";
pub const DATASKETCHES_MEASURE: &str = "datasketches/measure";
pub const ZETASKETCH_JAR: &str = "zetasketch/measure.jar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProfile {
    pub string_length: u32,
    /// Passed as both `-Xms` and `-Xmx` to the zetasketch JVM.
    pub jvm_heap: String,
}

impl Default for CommandProfile {
    fn default() -> Self {
        Self {
            string_length: 8,
            jvm_heap: "96g".to_string(),
        }
    }
}

/// Measurement binary and its variant flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Measure {
    Sketch {
        flags: Option<&'static str>,
        name: &'static str,
    },
    DataSketches {
        hll_bits: Option<u8>,
        name: &'static str,
    },
    ZetaSketch,
}

impl Measure {
    fn of(algorithm: Algorithm) -> Self {
        use Algorithm::*;
        match algorithm {
            HyperLogLog => Measure::Sketch {
                flags: None,
                name: "hyperloglog",
            },
            HyperLogLogZstd => Measure::Sketch {
                flags: None,
                name: "hyperloglogzstd",
            },
            HashOnly => Measure::Sketch {
                flags: None,
                name: "hashonly",
            },
            HyperLogLogLog => Measure::Sketch {
                flags: Some("default"),
                name: "hyperlogloglog",
            },
            HyperLogLogLogAppendOnly => Measure::Sketch {
                flags: Some("appendonly"),
                name: "hyperlogloglog",
            },
            HyperLogLogLogIncreaseOnly => Measure::Sketch {
                flags: Some("increaseonly"),
                name: "hyperlogloglog",
            },
            HyperLogLogLogAppendIncreaseOnly => Measure::Sketch {
                flags: Some("appendincreaseonly"),
                name: "hyperlogloglog",
            },
            HyperLogLogLogBottom => Measure::Sketch {
                flags: Some("bottom"),
                name: "hyperlogloglog",
            },
            ApacheHll4 => Measure::DataSketches {
                hll_bits: Some(4),
                name: "hll",
            },
            ApacheHll6 => Measure::DataSketches {
                hll_bits: Some(6),
                name: "hll",
            },
            ApacheHll8 => Measure::DataSketches {
                hll_bits: Some(8),
                name: "hll",
            },
            ApacheCpc => Measure::DataSketches {
                hll_bits: None,
                name: "cpc",
            },
            ZetaSketch => Measure::ZetaSketch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialCommand {
    generator: Vec<String>,
    measure: Vec<String>,
}

impl TrialCommand {
    pub fn build(instance: &Instance, seed: u64, profile: &CommandProfile) -> Self {
        let len = profile.string_length.to_string();
        let is_string = instance.datatype == Datatype::RandomString;

        let mut generator = vec![GENERATOR.to_string()];
        match instance.datatype {
            Datatype::RandomString => generator.extend(["--len".to_string(), len.clone()]),
            Datatype::StructuredRecord => {
                generator.extend(["-m".to_string(), instance.m.to_string()])
            }
            Datatype::UInt64 => {}
        }
        generator.extend([
            instance.n.to_string(),
            instance.datatype.to_string(),
            seed.to_string(),
        ]);

        let mut measure = Vec::new();
        let name = match Measure::of(instance.algorithm) {
            Measure::Sketch { flags, name } => {
                measure.push(SKETCH_MEASURE.to_string());
                if let Some(flags) = flags {
                    measure.extend(["--flags".to_string(), flags.to_string()]);
                }
                Some(name)
            }
            Measure::DataSketches { hll_bits, name } => {
                measure.push(DATASKETCHES_MEASURE.to_string());
                if let Some(bits) = hll_bits {
                    measure.extend(["--hll-bits".to_string(), bits.to_string()]);
                }
                Some(name)
            }
            Measure::ZetaSketch => {
                measure.extend([
                    "java".to_string(),
                    format!("-Xms{}", profile.jvm_heap),
                    format!("-Xmx{}", profile.jvm_heap),
                    "-jar".to_string(),
                    ZETASKETCH_JAR.to_string(),
                ]);
                None
            }
        };
        // zetasketch takes the string length positionally at the end instead
        if is_string && name.is_some() {
            measure.extend(["--len".to_string(), len.clone()]);
        }
        measure.push(instance.mode.to_string());
        if let Some(name) = name {
            measure.push(name.to_string());
        }
        measure.extend([
            instance.datatype.to_string(),
            instance.m.to_string(),
            instance.n.to_string(),
        ]);
        if is_string && name.is_none() {
            measure.push(len);
        }

        Self { generator, measure }
    }

    pub fn generator_argv(&self) -> &[String] {
        &self.generator
    }

    pub fn measure_argv(&self) -> &[String] {
        &self.measure
    }

    pub fn script(&self) -> String {
        format!("{} | {}", shell_join(&self.generator), shell_join(&self.measure))
    }

    pub fn argv(&self) -> Vec<String> {
        vec!["/bin/bash".to_string(), "-c".to_string(), self.script()]
    }
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
