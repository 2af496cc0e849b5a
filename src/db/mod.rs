//! Database layer for getex
//!
//! Handles SQLite persistence of the `download_task` table. Methods on
//! [`Database`] are organized by domain:
//! - [`migrations`] — connection lifecycle, schema migrations
//! - [`tasks`] — task row CRUD
//!
//! Timestamps are stored as RFC 3339 text so the configured UTC offset
//! survives round-trips; `options` is stored as JSON text.

use chrono::{DateTime, FixedOffset};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;

use crate::config::TaskOptions;
use crate::error::{DatabaseError, Error, Result};
use crate::types::{Status, TaskId};

mod migrations;
mod tasks;

/// Database handle wrapping the connection pool.
///
/// The pool hands out short-lived connections, one per operation.
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// New task to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Original request URI
    pub uri: String,
    /// Total size in bytes, if negotiated
    pub filesize: Option<u64>,
    /// Absolute destination path after collision resolution
    pub path: String,
    /// Whether the server accepts ranged requests
    pub support_range: bool,
    /// Per-task option overlay
    pub options: TaskOptions,
    /// When the task was added
    pub start_time: DateTime<FixedOffset>,
}

/// Task record from the store
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique store-assigned ID
    pub id: TaskId,
    /// Original request URI
    pub uri: String,
    /// Total size in bytes, if known
    pub filesize: Option<u64>,
    /// Absolute destination path
    pub path: String,
    /// Whether the server accepts ranged requests
    pub support_range: bool,
    /// Per-task option overlay
    pub options: TaskOptions,
    /// When the task was added
    pub start_time: DateTime<FixedOffset>,
    /// When the task reached a terminal status
    pub end_time: Option<DateTime<FixedOffset>>,
    /// Current status
    pub status: Status,
    /// Download speed, populated from the collector on read; never persisted
    pub speed: Option<f64>,
}

impl Task {
    /// Checkpoint sidecar path for this task under the given suffix
    pub fn checkpoint_path(&self, tempfile_suffix: &str) -> std::path::PathBuf {
        std::path::PathBuf::from(format!("{}{}", self.path, tempfile_suffix))
    }
}

/// Raw row as stored; converted to [`Task`] after fetching
#[derive(Debug, FromRow)]
struct TaskRow {
    id: TaskId,
    uri: String,
    filesize: Option<i64>,
    path: String,
    support_range: bool,
    options: String,
    start_time: String,
    end_time: Option<String>,
    status: String,
    speed: Option<f64>,
}

impl TryFrom<TaskRow> for Task {
    type Error = Error;

    fn try_from(row: TaskRow) -> Result<Task> {
        let options: TaskOptions = serde_json::from_str(&row.options).map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "task {}: invalid options JSON: {e}",
                row.id
            )))
        })?;
        let parse_time = |field: &str, value: &str| {
            DateTime::parse_from_rfc3339(value).map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "task {}: invalid {field}: {e}",
                    row.id
                )))
            })
        };
        let start_time = parse_time("start_time", &row.start_time)?;
        let end_time = match &row.end_time {
            Some(value) => Some(parse_time("end_time", value)?),
            None => None,
        };
        Ok(Task {
            id: row.id,
            uri: row.uri,
            filesize: row.filesize.map(|n| n as u64),
            path: row.path,
            support_range: row.support_range,
            options,
            start_time,
            end_time,
            status: Status::parse(&row.status),
            speed: row.speed,
        })
    }
}
