//! Error types for getex
//!
//! One `Error` enum covers the whole engine: lifecycle misuse (`NotActive`,
//! `AlreadyActive`, `NotFound`), transport and I/O failures, and the internal
//! `Cancelled` sentinel that pause/stop use to unwind block workers without
//! touching the stored status.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::TaskId;

/// Result type alias for getex operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for getex
#[derive(Debug, Error)]
pub enum Error {
    /// Operation requires a pending task, but the id is not executing
    #[error("no active task with id {0}")]
    NotActive(TaskId),

    /// Unpause called on a task that is already executing
    #[error("task {0} is already running")]
    AlreadyActive(TaskId),

    /// Task row absent from the store
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// Operation is not valid for the task's current status
    #[error("cannot {operation} task {id} in status {status}")]
    InvalidState {
        /// The task the operation was attempted on
        id: TaskId,
        /// The operation that was attempted (e.g. "unpause")
        operation: &'static str,
        /// The stored status that forbids it
        status: String,
    },

    /// No registered handler accepts the URI
    #[error("no handler accepts uri: {0}")]
    NoHandler(String),

    /// No downloader factory registered under the configured name
    #[error("unknown downloader '{0}'")]
    UnknownDownloader(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Downloader-origin failure (connect, protocol, HTTP status after
    /// the adapter exhausted its retries)
    #[error("transport error: {0}")]
    Transport(String),

    /// HTTP client error from the default adapter
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Positional write failure, open failure, disk-full
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Checkpoint sidecar could not be decoded.
    ///
    /// Recovered by falling back to a fresh split; surfaces only in logs.
    #[error("corrupt checkpoint {path}: {reason}")]
    CheckpointCorrupt {
        /// The sidecar file that failed to decode
        path: PathBuf,
        /// Why decoding failed
        reason: String,
    },

    /// A block worker's stream ended before (or after) its declared range
    #[error("incomplete block {index}: cursor {cursor} expected {expected}")]
    IncompleteBlock {
        /// Index of the block within the split
        index: usize,
        /// Cursor position when the stream ended
        cursor: u64,
        /// Expected cursor position (`end + 1`)
        expected: u64,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable message describing the configuration issue
        message: String,
        /// The configuration key that caused the error, if known
        key: Option<String>,
    },

    /// Serialization error (task options, global option merge)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal sentinel for pause/stop unwinding.
    ///
    /// Never surfaced as a stored status; the completion callback treats it
    /// as "someone else already decided what the row should say".
    #[error("task cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is the cancellation sentinel
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}
