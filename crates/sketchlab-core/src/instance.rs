use crate::dimensions::{Algorithm, Datatype, Family, Mode};
use crate::error::ConfigError;
use crate::grid::{GridConfig, APACHE_CPC_MAX_M, ZETASKETCH_MIN_M};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One point of the benchmark grid. The unit of persisted output and of resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instance {
    pub mode: Mode,
    pub algorithm: Algorithm,
    pub datatype: Datatype,
    pub m: u64,
    pub n: u64,
}

impl Instance {
    /// File stub shared by the result record and its diagnostic artifacts.
    pub fn stub(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.mode, self.algorithm, self.datatype, self.m, self.n
        )
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} m={} n={}",
            self.mode, self.algorithm, self.datatype, self.m, self.n
        )
    }
}

/// Why a grid point never becomes an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    BaselineNotMergeable,
    RecordsNeedSketch,
    BelowMinRegisters,
    AboveMaxRegisters,
}

pub fn structural_exclusion(
    mode: Mode,
    algorithm: Algorithm,
    datatype: Datatype,
    m: u64,
) -> Option<Exclusion> {
    if mode == Mode::Merge && algorithm.family() == Family::Baseline {
        return Some(Exclusion::BaselineNotMergeable);
    }
    if datatype == Datatype::StructuredRecord && algorithm.family() != Family::Sketch {
        return Some(Exclusion::RecordsNeedSketch);
    }
    if algorithm == Algorithm::ZetaSketch && m < ZETASKETCH_MIN_M {
        return Some(Exclusion::BelowMinRegisters);
    }
    if algorithm == Algorithm::ApacheCpc && m >= APACHE_CPC_MAX_M {
        return Some(Exclusion::AboveMaxRegisters);
    }
    None
}

/// Exact-match restrictions; `None` leaves a dimension unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Filters {
    pub mode: Option<Mode>,
    pub algorithm: Option<Algorithm>,
    pub datatype: Option<Datatype>,
    pub m: Option<u64>,
    pub n: Option<u64>,
}

impl Filters {
    /// Numeric filters must name grid values. Enum filters are valid by construction.
    pub fn validate(&self, grid: &GridConfig) -> Result<(), ConfigError> {
        if let Some(m) = self.m {
            grid.check_register_count(m)?;
        }
        if let Some(n) = self.n {
            grid.check_input_size(n)?;
        }
        Ok(())
    }

    fn admits<T: PartialEq>(filter: Option<T>, value: T) -> bool {
        filter.map_or(true, |f| f == value)
    }
}

pub struct InstanceSpace {
    ms: Vec<u64>,
    ns: Vec<u64>,
}

impl InstanceSpace {
    pub fn new(grid: &GridConfig) -> Self {
        Self {
            ms: grid.register_counts(),
            ns: grid.input_sizes(),
        }
    }

    /// Cross product in mode, algorithm, datatype, m, n nesting order.
    pub fn enumerate(&self, filters: &Filters) -> Vec<Instance> {
        let mut instances = Vec::new();
        for mode in Mode::ALL {
            if !Filters::admits(filters.mode, mode) {
                continue;
            }
            for algorithm in Algorithm::ALL {
                if !Filters::admits(filters.algorithm, algorithm) {
                    continue;
                }
                for datatype in Datatype::ALL {
                    if !Filters::admits(filters.datatype, datatype) {
                        continue;
                    }
                    for &m in &self.ms {
                        if !Filters::admits(filters.m, m) {
                            continue;
                        }
                        if structural_exclusion(mode, algorithm, datatype, m).is_some() {
                            continue;
                        }
                        for &n in &self.ns {
                            if !Filters::admits(filters.n, n) {
                                continue;
                            }
                            instances.push(Instance {
                                mode,
                                algorithm,
                                datatype,
                                m,
                                n,
                            });
                        }
                    }
                }
            }
        }
        instances
    }
}
