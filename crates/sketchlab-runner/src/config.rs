//! YAML campaign files and their merge with command-line overrides.
//!
//! A file may set any grid parameter and a default for every run option.
//! Command-line values always win over the file.

use crate::controller::{CampaignConfig, DEFAULT_MAX_MEMORY};
use crate::sandbox::{DockerSandbox, LocalSandbox, Sandbox, SandboxLimits};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sketchlab_core::{Algorithm, Datatype, Filters, GridConfig, Mode, DEFAULT_CAMPAIGN_SEED};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "hyperlogloglog";
pub const DEFAULT_RESULTS_DIR: &str = "results";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    #[default]
    Docker,
    Local,
}

impl ExecutorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorKind::Docker => "docker",
            ExecutorKind::Local => "local",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignFile {
    pub grid: GridConfig,
    pub jvm_heap: Option<String>,
    pub image: Option<String>,
    pub cpu: Option<usize>,
    pub max_memory: Option<u64>,
    pub random_seed: Option<u64>,
    pub results_dir: Option<PathBuf>,
    pub executor: Option<ExecutorKind>,
    pub trial_timeout_secs: Option<u64>,
    pub filters: Filters,
}

impl CampaignFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading campaign file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing campaign file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }
}

/// Values given on the command line. `None` defers to the file, then the default.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub image: Option<String>,
    pub cpu: Option<usize>,
    pub max_memory: Option<u64>,
    pub random_seed: Option<u64>,
    pub results_dir: Option<PathBuf>,
    pub executor: Option<ExecutorKind>,
    pub trial_timeout_secs: Option<u64>,
    pub mode: Option<Mode>,
    pub algorithm: Option<Algorithm>,
    pub datatype: Option<Datatype>,
    pub m: Option<u64>,
    pub n: Option<u64>,
}

/// Fully merged settings of one invocation.
#[derive(Debug, Clone)]
pub struct ResolvedCampaign {
    pub campaign: CampaignConfig,
    pub image: String,
    pub executor: ExecutorKind,
}

impl ResolvedCampaign {
    /// Filters are checked against the grid here so a bad `-m` or `-n`
    /// fails before any trial runs.
    pub fn resolve(file: CampaignFile, cli: RunOverrides) -> Result<Self> {
        let filters = Filters {
            mode: cli.mode.or(file.filters.mode),
            algorithm: cli.algorithm.or(file.filters.algorithm),
            datatype: cli.datatype.or(file.filters.datatype),
            m: cli.m.or(file.filters.m),
            n: cli.n.or(file.filters.n),
        };
        let campaign = CampaignConfig {
            grid: file.grid,
            campaign_seed: cli
                .random_seed
                .or(file.random_seed)
                .unwrap_or(DEFAULT_CAMPAIGN_SEED),
            filters,
            limits: SandboxLimits {
                cpu: cli.cpu.or(file.cpu).unwrap_or(0),
                memory_bytes: cli
                    .max_memory
                    .or(file.max_memory)
                    .unwrap_or(DEFAULT_MAX_MEMORY),
            },
            trial_timeout: cli
                .trial_timeout_secs
                .or(file.trial_timeout_secs)
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            jvm_heap: file
                .jvm_heap
                .unwrap_or_else(|| CampaignConfig::default().jvm_heap),
            results_dir: cli
                .results_dir
                .or(file.results_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
        };
        campaign.validate()?;
        Ok(Self {
            campaign,
            image: cli
                .image
                .or(file.image)
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            executor: cli.executor.or(file.executor).unwrap_or_default(),
        })
    }

    pub fn sandbox(&self) -> Box<dyn Sandbox> {
        match self.executor {
            ExecutorKind::Docker => Box::new(DockerSandbox::new(&self.image)),
            ExecutorKind::Local => Box::new(LocalSandbox::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchlab_core::ConfigError;

    #[test]
    fn defaults_without_file_or_flags() {
        let resolved =
            ResolvedCampaign::resolve(CampaignFile::default(), RunOverrides::default())
                .expect("defaults are valid");
        assert_eq!(resolved.image, "hyperlogloglog");
        assert_eq!(resolved.executor, ExecutorKind::Docker);
        assert_eq!(resolved.campaign.campaign_seed, 0x11e3ea10);
        assert_eq!(resolved.campaign.limits.cpu, 0);
        assert_eq!(resolved.campaign.limits.memory_bytes, 128 * 1024 * 1024 * 1024);
        assert_eq!(resolved.campaign.results_dir, PathBuf::from("results"));
        assert_eq!(resolved.campaign.trial_timeout, None);
        assert_eq!(resolved.campaign.jvm_heap, "96g");
    }

    #[test]
    fn file_values_apply_and_flags_override_them() {
        let file = CampaignFile::parse(
            r#"
grid:
  max_log_n: 12
  max_log_m: 8
  repetitions: 3
jvm_heap: 8g
image: sketches:dev
cpu: 3
random_seed: 7
executor: local
trial_timeout_secs: 600
filters:
  algorithm: apache-cpc
  datatype: str
"#,
        )
        .expect("parse");
        assert_eq!(file.grid.max_log_n, 12);
        assert_eq!(file.grid.min_log_m, 4);
        assert_eq!(file.filters.algorithm, Some(Algorithm::ApacheCpc));

        let cli = RunOverrides {
            cpu: Some(5),
            datatype: Some(Datatype::UInt64),
            m: Some(64),
            ..RunOverrides::default()
        };
        let resolved = ResolvedCampaign::resolve(file, cli).expect("resolve");
        let campaign = &resolved.campaign;
        assert_eq!(resolved.image, "sketches:dev");
        assert_eq!(resolved.executor, ExecutorKind::Local);
        assert_eq!(campaign.limits.cpu, 5);
        assert_eq!(campaign.campaign_seed, 7);
        assert_eq!(campaign.grid.repetitions, 3);
        assert_eq!(campaign.jvm_heap, "8g");
        assert_eq!(campaign.trial_timeout, Some(Duration::from_secs(600)));
        assert_eq!(campaign.filters.algorithm, Some(Algorithm::ApacheCpc));
        assert_eq!(campaign.filters.datatype, Some(Datatype::UInt64));
        assert_eq!(campaign.filters.m, Some(64));
    }

    #[test]
    fn off_grid_filter_is_rejected_before_running() {
        let cli = RunOverrides {
            m: Some(1_000_000),
            ..RunOverrides::default()
        };
        let err = ResolvedCampaign::resolve(CampaignFile::default(), cli)
            .expect_err("1M is not a power of two in the grid");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::RegisterCountOutOfGrid(1_000_000))
        );
    }

    #[test]
    fn unknown_keys_and_bad_names_fail_to_parse() {
        assert!(CampaignFile::parse("max_repetitions: 3\n").is_err());
        assert!(CampaignFile::parse("filters:\n  algorithm: loglog\n").is_err());
        assert_eq!(CampaignFile::parse("  \n").expect("empty"), CampaignFile::default());
    }

    #[test]
    fn zero_timeout_means_no_timeout() {
        let cli = RunOverrides {
            trial_timeout_secs: Some(0),
            ..RunOverrides::default()
        };
        let resolved = ResolvedCampaign::resolve(CampaignFile::default(), cli).expect("resolve");
        assert_eq!(resolved.campaign.trial_timeout, None);
    }

    #[test]
    fn executor_selects_sandbox() {
        let mut resolved =
            ResolvedCampaign::resolve(CampaignFile::default(), RunOverrides::default())
                .expect("resolve");
        assert_eq!(resolved.sandbox().identity(), "hyperlogloglog");
        resolved.executor = ExecutorKind::Local;
        assert_eq!(resolved.sandbox().identity(), "local");
    }
}
