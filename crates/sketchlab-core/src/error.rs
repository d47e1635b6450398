use thiserror::Error;

/// Rejected configuration, raised before any trial is launched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown mode: {0} (expected one of: {1})")]
    UnknownMode(String, String),

    #[error("unknown algorithm: {0} (expected one of: {1})")]
    UnknownAlgorithm(String, String),

    #[error("unknown datatype: {0} (expected one of: {1})")]
    UnknownDatatype(String, String),

    #[error("register count {0} is not part of the configured grid")]
    RegisterCountOutOfGrid(u64),

    #[error("input size {0} is not part of the configured grid")]
    InputSizeOutOfGrid(u64),

    #[error("invalid grid: {0}")]
    InvalidGrid(String),
}

/// Trial stdout that does not yield the fixed five-field record.
#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("trial produced no output")]
    Empty,

    #[error("key without value: {0}")]
    DanglingKey(String),

    #[error("value for {key} is not numeric: {value}")]
    NotNumeric { key: String, value: String },

    #[error("field {0} appears more than once")]
    DuplicateField(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("no seed for ({datatype}, m={m}, n={n}): tuple is outside the grid")]
    OutOfGrid { datatype: String, m: u64, n: u64 },

    #[error("repetition {repetition} out of range (campaign runs {repetitions})")]
    RepetitionOutOfRange { repetition: usize, repetitions: usize },
}
