use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a reconciliation cycle or a store operation.
#[derive(Debug, Error)]
pub enum CuratorError {
    /// The catalog store could not be reached or refused the write.
    #[error("catalog store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// A record failed validation on `put` and the store was left untouched.
    #[error("invalid record '{source_id}': {reason}")]
    InvalidRecord { source_id: String, reason: String },

    /// A stored row could not be turned back into a source record.
    #[error("corrupt catalog row '{source_id}': {reason}")]
    CorruptRow { source_id: String, reason: String },

    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error for '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another cycle holds the catalog.
    #[error("a reconciliation cycle is already running")]
    CycleInProgress,
}

/// Why a single feedback entry was not applied. Never aborts a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("target source '{0}' does not exist")]
    TargetNotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("score {0} is outside [0, 1]")]
pub struct ScoreOutOfRange(pub f64);

pub type Result<T> = std::result::Result<T, CuratorError>;
