//! Error types for relaxd.

use thiserror::Error;

/// Main error type for relaxd.
#[derive(Error, Debug)]
pub enum RelaxError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("No job store found at {0}. Run 'relaxd submit' to create one.")]
    NoStore(String),

    #[error("Job store is corrupted: {0}")]
    CorruptStore(String),

    #[error(
        "Job store schema version {store_version} is newer than supported version {supported_version}. Please update relaxd."
    )]
    StoreTooNew {
        store_version: u32,
        supported_version: u32,
    },

    #[error("Job {0} not found")]
    JobNotFound(i64),

    #[error("Job {job} is not in queue '{queue}'")]
    NotInQueue { job: i64, queue: String },

    #[error("Invalid job id '{0}': expected a positive integer")]
    InvalidJobId(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No calculator configured. Pass --calculator or set it in the settings file.")]
    NoCalculator,

    #[error("Calculator failed on job {job}: {message}")]
    Calculator { job: i64, message: String },

    #[error("Calculator protocol error: {0}")]
    Protocol(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Launcher error: {0}")]
    Launcher(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for relaxd operations.
pub type Result<T> = std::result::Result<T, RelaxError>;
