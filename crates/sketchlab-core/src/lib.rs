//! Grid, seeds and trial records for sketch benchmark campaigns.

pub mod dimensions;
pub mod error;
pub mod fsutil;
pub mod grid;
pub mod instance;
pub mod seed;
pub mod trial;

pub use dimensions::{Algorithm, Datatype, Family, Mode};
pub use error::{ConfigError, FormatError, SeedError};
pub use fsutil::{atomic_write_bytes, atomic_write_json_pretty, ensure_dir};
pub use grid::{GridConfig, DEFAULT_CAMPAIGN_SEED};
pub use instance::{structural_exclusion, Exclusion, Filters, Instance, InstanceSpace};
pub use seed::SeedDeriver;
pub use trial::{parse_trial_output, TrialRecord, FIELDS};
