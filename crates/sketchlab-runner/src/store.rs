//! One JSON record per completed instance. A record's presence is the
//! resume checkpoint, so it is only ever written whole.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sketchlab_core::fsutil::{atomic_write_json_pretty, ensure_dir, is_temp_name};
use sketchlab_core::{Algorithm, Datatype, Instance, Mode, TrialRecord, FIELDS};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RECORD_SCHEMA_VERSION: &str = "sketch_result_v1";
const RECORD_EXT: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("results directory {path}: {source}")]
    Root { path: PathBuf, source: io::Error },

    #[error("failed to write record {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to read record {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("record {path} is not valid: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("refusing to write {stub}: {reason}")]
    Incomplete { stub: String, reason: String },

    #[error("failed to scan results directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("instance lock {path}: {source}")]
    Lock { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub schema_version: String,
    pub mode: Mode,
    pub algorithm: Algorithm,
    pub datatype: Datatype,
    pub m: u64,
    pub n: u64,
    pub columns: Vec<String>,
    /// One row per repetition, columns in [`FIELDS`] order.
    pub measurements: Vec<[f64; 5]>,
    pub campaign_seed: u64,
    pub seeds: Vec<u64>,
    pub sandbox: String,
    pub hostname: String,
    pub created_at: String,
}

impl ResultRecord {
    pub fn new(
        instance: &Instance,
        campaign_seed: u64,
        seeds: Vec<u64>,
        trials: &[TrialRecord],
        sandbox: &str,
        hostname: &str,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION.to_string(),
            mode: instance.mode,
            algorithm: instance.algorithm,
            datatype: instance.datatype,
            m: instance.m,
            n: instance.n,
            columns: FIELDS.iter().map(|f| f.to_string()).collect(),
            measurements: trials.iter().map(TrialRecord::to_row).collect(),
            campaign_seed,
            seeds,
            sandbox: sandbox.to_string(),
            hostname: hostname.to_string(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn instance(&self) -> Instance {
        Instance {
            mode: self.mode,
            algorithm: self.algorithm,
            datatype: self.datatype,
            m: self.m,
            n: self.n,
        }
    }

    pub fn trials(&self) -> impl Iterator<Item = TrialRecord> + '_ {
        self.measurements.iter().copied().map(TrialRecord::from_row)
    }

    fn check_shape(&self) -> Result<(), String> {
        if self.schema_version != RECORD_SCHEMA_VERSION {
            return Err(format!("unsupported schema {}", self.schema_version));
        }
        if self.columns.iter().map(String::as_str).ne(FIELDS.iter().copied()) {
            return Err(format!("unexpected columns {:?}", self.columns));
        }
        if self.measurements.is_empty() {
            return Err("no measurement rows".to_string());
        }
        if self.measurements.len() != self.seeds.len() {
            return Err(format!(
                "{} measurement rows for {} seeds",
                self.measurements.len(),
                self.seeds.len()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        ensure_dir(root).map_err(|source| StorageError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Store handle that never touches the filesystem until used; a missing
    /// root simply holds no records.
    pub fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, instance: &Instance) -> PathBuf {
        self.artifact_path(instance, RECORD_EXT)
    }

    /// Sibling file of the record sharing its stub, e.g. `.log` or `.lock`.
    pub fn artifact_path(&self, instance: &Instance, ext: &str) -> PathBuf {
        self.root.join(format!("{}.{}", instance.stub(), ext))
    }

    pub fn exists(&self, instance: &Instance) -> bool {
        self.record_path(instance).is_file()
    }

    /// Records with a wrong shape are refused; the rename makes the write
    /// all-or-nothing for readers.
    pub fn write(&self, record: &ResultRecord) -> Result<(), StorageError> {
        let instance = record.instance();
        record
            .check_shape()
            .map_err(|reason| StorageError::Incomplete {
                stub: instance.stub(),
                reason,
            })?;
        let path = self.record_path(&instance);
        atomic_write_json_pretty(&path, record)
            .map_err(|source| StorageError::Write { path, source })
    }

    pub fn read(&self, instance: &Instance) -> Result<Option<ResultRecord>, StorageError> {
        let path = self.record_path(instance);
        if !path.is_file() {
            return Ok(None);
        }
        load_record(&path).map(Some)
    }

    /// Lazy scan over every stored record. Call again to restart.
    pub fn read_all(&self) -> StoredRecords {
        StoredRecords {
            entries: walkdir::WalkDir::new(&self.root)
                .min_depth(1)
                .max_depth(1)
                .into_iter(),
        }
    }
}

fn load_record(path: &Path) -> Result<ResultRecord, StorageError> {
    let bytes = fs::read(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let record: ResultRecord =
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    record
        .check_shape()
        .map_err(|reason| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason,
        })?;
    Ok(record)
}

pub struct StoredRecords {
    entries: walkdir::IntoIter,
}

impl Iterator for StoredRecords {
    type Item = Result<ResultRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.entries.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e.into())),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_temp_name(&name) {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            return Some(load_record(entry.path()));
        }
    }
}
