//! Shape of the benchmark grid: which register counts and input sizes exist,
//! and how many repetitions each instance runs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CAMPAIGN_SEED: u64 = 0x11e3ea10;

/// `zetasketch` only works with at least this many registers.
pub const ZETASKETCH_MIN_M: u64 = 1024;

/// `apache-cpc` does not scale to this many registers or more.
pub const APACHE_CPC_MAX_M: u64 = 524_288;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    pub min_log_m: u32,
    pub max_log_m: u32,
    pub min_log_n: u32,
    pub max_log_n: u32,
    pub repetitions: usize,
    pub string_length: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            min_log_m: 4,
            max_log_m: 18,
            min_log_n: 4,
            max_log_n: 30,
            repetitions: 10,
            string_length: 8,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_log_m > self.max_log_m {
            return Err(ConfigError::InvalidGrid(format!(
                "min_log_m {} exceeds max_log_m {}",
                self.min_log_m, self.max_log_m
            )));
        }
        if self.min_log_n > self.max_log_n {
            return Err(ConfigError::InvalidGrid(format!(
                "min_log_n {} exceeds max_log_n {}",
                self.min_log_n, self.max_log_n
            )));
        }
        if self.max_log_m > 62 || self.max_log_n > 62 {
            return Err(ConfigError::InvalidGrid(
                "log sizes above 62 overflow 64-bit counts".to_string(),
            ));
        }
        if self.repetitions == 0 {
            return Err(ConfigError::InvalidGrid(
                "repetitions must be at least 1".to_string(),
            ));
        }
        if self.string_length == 0 {
            return Err(ConfigError::InvalidGrid(
                "string_length must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Powers of two from `2^min_log_m` to `2^max_log_m`.
    pub fn register_counts(&self) -> Vec<u64> {
        (self.min_log_m..=self.max_log_m).map(|k| 1u64 << k).collect()
    }

    /// Log-spaced sizes interleaving `2^k` with `round(sqrt(2) * 2^k)`,
    /// ending at `2^max_log_n`. Strictly increasing.
    pub fn input_sizes(&self) -> Vec<u64> {
        (2 * self.min_log_n..=2 * self.max_log_n)
            .map(|i| {
                let base = 1u64 << (i / 2);
                if i % 2 == 0 {
                    base
                } else {
                    (std::f64::consts::SQRT_2 * base as f64).round() as u64
                }
            })
            .collect()
    }

    pub fn check_register_count(&self, m: u64) -> Result<(), ConfigError> {
        if self.register_counts().contains(&m) {
            Ok(())
        } else {
            Err(ConfigError::RegisterCountOutOfGrid(m))
        }
    }

    pub fn check_input_size(&self, n: u64) -> Result<(), ConfigError> {
        if self.input_sizes().contains(&n) {
            Ok(())
        } else {
            Err(ConfigError::InputSizeOutOfGrid(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_register_counts_span_16_to_262144() {
        let ms = GridConfig::default().register_counts();
        assert_eq!(ms.len(), 15);
        assert_eq!(ms.first(), Some(&16));
        assert_eq!(ms.last(), Some(&262_144));
    }

    #[test]
    fn input_sizes_interleave_sqrt2_steps() {
        let ns = GridConfig::default().input_sizes();
        assert_eq!(&ns[..5], &[16, 23, 32, 45, 64]);
        assert_eq!(ns[8], 256);
        assert_eq!(ns.last(), Some(&(1u64 << 30)));
        assert_eq!(ns.len(), 53);
        assert!(ns.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn validate_rejects_degenerate_grids() {
        let mut grid = GridConfig::default();
        grid.repetitions = 0;
        assert!(grid.validate().is_err());

        let mut grid = GridConfig::default();
        grid.min_log_m = 20;
        let err = grid.validate().expect_err("inverted m range");
        assert!(err.to_string().contains("min_log_m"), "{}", err);

        GridConfig::default().validate().expect("default grid is valid");
    }

    #[test]
    fn membership_checks_follow_the_grid() {
        let grid = GridConfig::default();
        grid.check_register_count(1024).expect("in grid");
        assert_eq!(
            grid.check_register_count(1_048_576),
            Err(ConfigError::RegisterCountOutOfGrid(1_048_576))
        );
        grid.check_input_size(181).expect("round(sqrt2 * 128)");
        assert!(grid.check_input_size(100).is_err());
    }
}
