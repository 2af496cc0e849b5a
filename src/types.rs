//! Core types for getex

use serde::{Deserialize, Serialize};

/// Unique identifier for a download task, assigned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task status, stored as text in the `download_task` table.
///
/// A task is created in `Downloading`; a crash leaves it there so startup
/// recovery re-runs it. `Stopped` and `Complete` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Actively downloading (or interrupted by a crash while doing so)
    Downloading,
    /// Paused by user; checkpoint retained for resumption
    Paused,
    /// Stopped by user; checkpoint removed
    Stopped,
    /// Successfully completed
    Complete,
    /// Failed; checkpoint retained so the operator may unpause
    Error,
}

impl Status {
    /// The stored text representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Stopped => "stopped",
            Status::Complete => "complete",
            Status::Error => "error",
        }
    }

    /// Parse a stored text status.
    ///
    /// Unknown text decodes to `Error` so corrupted rows surface visibly
    /// instead of silently re-downloading.
    pub fn parse(s: &str) -> Self {
        match s {
            "downloading" => Status::Downloading,
            "paused" => Status::Paused,
            "stopped" => Status::Stopped,
            "complete" => Status::Complete,
            _ => Status::Error,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File metadata negotiated with the remote server before a download starts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileMetadata {
    /// Total size in bytes, if the server reports one
    pub filesize: Option<u64>,
    /// Suggested filename (before collision resolution)
    pub filename: String,
    /// Whether the server accepts ranged requests
    pub support_range: bool,
}

/// Event emitted to broadcast subscribers during the task lifecycle.
///
/// Plugins receive the same notifications through their typed methods; this
/// channel is the poll-free surface for embedding applications.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Engine startup recovery finished
    Startup,

    /// A handler execution was spawned for the task
    Started {
        /// Task ID
        id: TaskId,
    },

    /// Task paused; checkpoint written
    Paused {
        /// Task ID
        id: TaskId,
    },

    /// Task stopped; checkpoint removed
    Stopped {
        /// Task ID
        id: TaskId,
    },

    /// Task finished downloading and was marked complete
    Complete {
        /// Task ID
        id: TaskId,
    },

    /// Task transitioned to error status
    DownloadError {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// Graceful shutdown initiated
    Shutdown,
}
