//! Campaign execution: sandboxed trials, the result store, resume and export.

pub mod command;
pub mod config;
pub mod controller;
pub mod export;
pub mod lock;
pub mod runner;
pub mod sandbox;
pub mod store;

pub use command::{CommandProfile, TrialCommand};
pub use config::{CampaignFile, ExecutorKind, ResolvedCampaign, RunOverrides};
pub use controller::{
    plan_campaign, AbandonedInstance, CampaignConfig, CampaignController, CampaignPlan,
    CampaignReport,
};
pub use export::{export_csv, ExportSummary};
pub use lock::{local_hostname, try_claim, ClaimOutcome, ClaimOwner, InstanceClaim};
pub use runner::{InstanceArtifacts, SandboxRunner, TrialError, TrialOutput};
pub use sandbox::{
    CapturedLogs, DockerSandbox, ExitInfo, LocalSandbox, Sandbox, SandboxError, SandboxHandle,
    SandboxLimits,
};
pub use store::{ResultRecord, ResultStore, StorageError, StoredRecords, RECORD_SCHEMA_VERSION};
