use std::io;
use thiserror::Error;

/// Failures raised by a [`Storage`](crate::core::storage::Storage) backend.
///
/// These only ever surface from the direct (authorized) and policy-gap paths.
/// A delegated mutation never reaches storage.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Edit target not found in {0}")]
    MatchNotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Invalid list pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown actor '{actor}': not declared in this deployment's roster")]
    UnknownActor { actor: String },
    #[error("Ownership unclear for path '{path}': no rule matches and policy is fail-closed")]
    OwnershipUnclear { path: String },
    #[error("Ownership violation: '{actor}' may not mutate '{path}' (owner: '{owner}')")]
    OwnershipViolation {
        actor: String,
        owner: String,
        path: String,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Audit persistence error: {0}")]
    AuditPersistence(String),
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Unexpected storage output for {0} operation")]
    UnexpectedOutput(String),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl WardenError {
    pub(crate) fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        WardenError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
