//! Drives a campaign: enumerate, skip what is already stored, run every
//! repetition of each remaining instance, persist whole records.

use crate::command::CommandProfile;
use crate::lock::{local_hostname, try_claim, ClaimOutcome};
use crate::runner::{InstanceArtifacts, SandboxRunner, TrialError};
use crate::sandbox::{Sandbox, SandboxLimits};
use crate::store::{ResultRecord, ResultStore};
use anyhow::{Context, Result};
use serde::Serialize;
use sketchlab_core::{
    parse_trial_output, ConfigError, Filters, GridConfig, Instance, InstanceSpace, SeedDeriver,
    TrialRecord, DEFAULT_CAMPAIGN_SEED,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_MAX_MEMORY: u64 = 128 << 30;

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub grid: GridConfig,
    pub campaign_seed: u64,
    pub filters: Filters,
    pub limits: SandboxLimits,
    pub trial_timeout: Option<Duration>,
    pub jvm_heap: String,
    pub results_dir: PathBuf,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            campaign_seed: DEFAULT_CAMPAIGN_SEED,
            filters: Filters::default(),
            limits: SandboxLimits {
                cpu: 0,
                memory_bytes: DEFAULT_MAX_MEMORY,
            },
            trial_timeout: None,
            jvm_heap: CommandProfile::default().jvm_heap,
            results_dir: PathBuf::from("results"),
        }
    }
}

impl CampaignConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.filters.validate(&self.grid)?;
        if self.limits.memory_bytes == 0 {
            return Err(ConfigError::InvalidGrid(
                "memory ceiling must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn command_profile(&self) -> CommandProfile {
        CommandProfile {
            string_length: self.grid.string_length,
            jvm_heap: self.jvm_heap.clone(),
        }
    }
}

/// Work list for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignPlan {
    pub enumerated: usize,
    pub already_complete: usize,
    pub pending: Vec<Instance>,
    pub repetitions: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbandonedInstance {
    pub instance: String,
    pub repetition: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignReport {
    pub enumerated: usize,
    pub already_complete: usize,
    pub pending: usize,
    pub completed: usize,
    pub claimed_elsewhere: usize,
    pub abandoned: Vec<AbandonedInstance>,
}

enum InstanceOutcome {
    Completed,
    CompletedElsewhere,
    ClaimedElsewhere,
    Abandoned { repetition: usize, error: TrialError },
}

fn build_plan(config: &CampaignConfig, space: &InstanceSpace, store: &ResultStore) -> CampaignPlan {
    let instances = space.enumerate(&config.filters);
    let enumerated = instances.len();
    let pending: Vec<Instance> = instances
        .into_iter()
        .filter(|i| !store.exists(i))
        .collect();
    CampaignPlan {
        enumerated,
        already_complete: enumerated - pending.len(),
        pending,
        repetitions: config.grid.repetitions,
    }
}

/// Work list of `config` without a sandbox and without creating anything on disk.
pub fn plan_campaign(config: &CampaignConfig) -> Result<CampaignPlan, ConfigError> {
    config.validate()?;
    let space = InstanceSpace::new(&config.grid);
    Ok(build_plan(config, &space, &ResultStore::at(&config.results_dir)))
}

pub struct CampaignController<S> {
    config: CampaignConfig,
    store: ResultStore,
    space: InstanceSpace,
    seeds: SeedDeriver,
    runner: SandboxRunner<S>,
    hostname: String,
}

impl<S: Sandbox> CampaignController<S> {
    pub fn new(config: CampaignConfig, sandbox: S) -> Result<Self> {
        config.validate()?;
        let store = ResultStore::open(&config.results_dir)?;
        let hostname = local_hostname();
        let runner = SandboxRunner::new(
            sandbox,
            config.limits,
            config.trial_timeout,
            config.command_profile(),
            &hostname,
        );
        let seeds = SeedDeriver::new(config.campaign_seed, &config.grid);
        let space = InstanceSpace::new(&config.grid);
        Ok(Self {
            config,
            store,
            space,
            seeds,
            runner,
            hostname,
        })
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn plan(&self) -> CampaignPlan {
        build_plan(&self.config, &self.space, &self.store)
    }

    /// Runs every pending instance in enumeration order.
    ///
    /// Trial failures abandon only their instance; storage failures end the run.
    pub fn run(&mut self) -> Result<CampaignReport> {
        let plan = self.plan();
        info!(instances = plan.enumerated, "enumerated instances");
        info!(
            complete = plan.already_complete,
            remaining = plan.pending.len(),
            "filtered out instances that have already been run"
        );
        let mut report = CampaignReport {
            enumerated: plan.enumerated,
            already_complete: plan.already_complete,
            pending: plan.pending.len(),
            ..CampaignReport::default()
        };

        for (idx, instance) in plan.pending.iter().enumerate() {
            info!(
                instance = %instance,
                progress = format!("{}/{}", idx + 1, plan.pending.len()),
                "running"
            );
            match self.run_instance(instance)? {
                InstanceOutcome::Completed => report.completed += 1,
                InstanceOutcome::CompletedElsewhere => report.already_complete += 1,
                InstanceOutcome::ClaimedElsewhere => report.claimed_elsewhere += 1,
                InstanceOutcome::Abandoned { repetition, error } => {
                    warn!(
                        instance = %instance,
                        repetition,
                        error = %error,
                        "abandoning instance; it stays eligible for the next run"
                    );
                    report.abandoned.push(AbandonedInstance {
                        instance: instance.stub(),
                        repetition,
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            completed = report.completed,
            abandoned = report.abandoned.len(),
            claimed_elsewhere = report.claimed_elsewhere,
            "campaign pass finished"
        );
        Ok(report)
    }

    fn run_instance(&mut self, instance: &Instance) -> Result<InstanceOutcome> {
        let lock_path = self.store.artifact_path(instance, "lock");
        let _claim = match try_claim(&lock_path, &self.hostname)? {
            ClaimOutcome::Acquired(claim) => claim,
            ClaimOutcome::HeldBy(owner) => {
                info!(
                    instance = %instance,
                    owner = ?owner,
                    "instance claimed by another controller, skipping"
                );
                return Ok(InstanceOutcome::ClaimedElsewhere);
            }
        };
        // Another controller may have finished it between planning and claiming.
        if self.store.exists(instance) {
            return Ok(InstanceOutcome::CompletedElsewhere);
        }

        let seeds = self
            .seeds
            .seeds_for(instance.datatype, instance.m, instance.n)
            .with_context(|| format!("deriving seeds for {}", instance))?;
        let mut artifacts = InstanceArtifacts::open(&self.store, instance)
            .with_context(|| format!("opening artifacts for {}", instance.stub()))?;

        let mut trials = Vec::with_capacity(seeds.len());
        for (repetition, &seed) in seeds.iter().enumerate() {
            match self.run_trial(instance, repetition, seed, &mut artifacts) {
                Ok(trial) => trials.push(trial),
                Err(error) if error.is_fatal() => {
                    return Err(error).with_context(|| format!("running {}", instance.stub()));
                }
                Err(error) => return Ok(InstanceOutcome::Abandoned { repetition, error }),
            }
        }

        let record = ResultRecord::new(
            instance,
            self.seeds.campaign_seed(),
            seeds,
            &trials,
            self.runner.sandbox_identity(),
            &self.hostname,
        );
        self.store.write(&record)?;
        info!(instance = %instance, "stored");
        Ok(InstanceOutcome::Completed)
    }

    fn run_trial(
        &mut self,
        instance: &Instance,
        repetition: usize,
        seed: u64,
        artifacts: &mut InstanceArtifacts,
    ) -> Result<TrialRecord, TrialError> {
        let output = self.runner.run(instance, repetition, seed, artifacts)?;
        let stdout = output.into_stdout(self.runner.timeout())?;
        Ok(parse_trial_output(&stdout)?)
    }
}
