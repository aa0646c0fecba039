use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the hypertune system
#[derive(Error, Debug)]
pub enum HtError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Trial store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Trial store at {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Trial store was created for workflow {stored}, current workflow is {current}")]
    WorkflowMismatch { stored: String, current: String },

    #[error("Trial store was created with choices {stored}, current search space declares {current}")]
    ChoiceTableMismatch { stored: String, current: String },

    #[error("Trial {tid} does not follow the last recorded trial {last}")]
    OutOfSequence { tid: usize, last: usize },
}

/// Job dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Job {dataset_id}/run {run_index} failed on {context}: {message}")]
    JobFailed {
        dataset_id: String,
        run_index: u32,
        context: String,
        message: String,
    },

    #[error("Worker {worker} is no longer reachable")]
    WorkerUnreachable { worker: usize },

    #[error("All workers disconnected while {in_flight} jobs were in flight")]
    Disconnected { in_flight: usize },

    #[error("Worker pool has already been released")]
    PoolReleased,

    #[error("Worker pool needs at least one worker")]
    EmptyPool,
}

/// Result artifact errors
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Result artifact missing: {path}")]
    Missing { path: PathBuf },

    #[error("Result artifact {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Snapshot promotion failed: {message}")]
    Promotion { message: String },
}

/// Dataset errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Dataset not found: {name}")]
    NotFound { name: String },

    #[error("Data directory {path} cannot be listed")]
    DirectoryUnavailable { path: PathBuf },

    #[error("Dataset {name} has no label column")]
    MissingLabels { name: String },

    #[error("Data parsing error in {name}: {message}")]
    ParseError { name: String, message: String },

    #[error("Insufficient data in {name}: {message}")]
    InsufficientData { name: String, message: String },
}

/// Result type alias for hypertune operations
pub type HtResult<T> = Result<T, HtError>;

/// Helper trait for converting string errors
pub trait IntoHtError {
    fn into_ht_error(self) -> HtError;
}

impl IntoHtError for String {
    fn into_ht_error(self) -> HtError {
        HtError::Internal(self)
    }
}

impl IntoHtError for &str {
    fn into_ht_error(self) -> HtError {
        HtError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::HtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HtError::Config(format!($($arg)*))
    };
}
