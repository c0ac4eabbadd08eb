//! Error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Path escapes repository: {0}")]
    PathEscape(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid backup file name: {0}")]
    Format(String),

    #[error("Operation cancelled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} deletions failed", .0.len())]
    Aggregate(Vec<BackupError>),

    #[error("Delta codec error: {0}")]
    DeltaCodec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO worker error: {0}")]
    Worker(String),
}

impl BackupError {
    /// True for cancellations, including expired deadlines.
    pub fn is_canceled(&self) -> bool {
        matches!(self, BackupError::Canceled)
    }

    /// Collapse per-entry failures: one error stays as-is, several aggregate.
    pub fn from_failures(mut failures: Vec<BackupError>) -> Option<BackupError> {
        match failures.len() {
            0 => None,
            1 => failures.pop(),
            _ => Some(BackupError::Aggregate(failures)),
        }
    }
}

impl From<walkdir::Error> for BackupError {
    fn from(err: walkdir::Error) -> Self {
        BackupError::Io(err.into())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
