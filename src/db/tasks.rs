//! Task row CRUD operations.

use chrono::{DateTime, FixedOffset};

use crate::config::TaskOptions;
use crate::error::{DatabaseError, Error, Result};
use crate::types::{Status, TaskId};

use super::{Database, NewTask, Task, TaskRow};

const TASK_COLUMNS: &str = "id, uri, filesize, path, support_range, options, \
     start_time, end_time, status, speed";

impl Database {
    /// Insert a new task row, returning its store-assigned id
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let options = serde_json::to_string(&task.options)?;

        let result = sqlx::query(
            r#"
            INSERT INTO download_task (
                uri, filesize, path, support_range, options, start_time, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&task.uri)
        .bind(task.filesize.map(|n| n as i64))
        .bind(&task.path)
        .bind(task.support_range)
        .bind(options)
        .bind(task.start_time.to_rfc3339())
        .bind(Status::Downloading.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to insert task: {e}"
            )))
        })?;

        Ok(TaskId(result.last_insert_rowid()))
    }

    /// Get a task by id
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM download_task WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to get task: {e}"
            )))
        })?;

        row.map(Task::try_from).transpose()
    }

    /// Get a task by id, or [`Error::NotFound`]
    pub async fn require_task(&self, id: TaskId) -> Result<Task> {
        self.get_task(id).await?.ok_or(Error::NotFound(id))
    }

    /// List every task in a given status, oldest first
    pub async fn list_by_status(&self, status: Status) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM download_task WHERE status = ? ORDER BY id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to list tasks by status: {e}"
            )))
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// List a page of tasks in a given status, oldest first
    pub async fn list_by_status_page(
        &self,
        status: Status,
        offset: u32,
        count: u32,
    ) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM download_task WHERE status = ? \
             ORDER BY id ASC LIMIT ? OFFSET ?"
        ))
        .bind(status.as_str())
        .bind(count as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to page tasks by status: {e}"
            )))
        })?;

        rows.into_iter().map(Task::try_from).collect()
    }

    /// Update a task's status, optionally stamping `end_time`
    pub async fn update_status(
        &self,
        id: TaskId,
        status: Status,
        end_time: Option<DateTime<FixedOffset>>,
    ) -> Result<()> {
        let query = match end_time {
            Some(end_time) => {
                sqlx::query("UPDATE download_task SET status = ?, end_time = ? WHERE id = ?")
                    .bind(status.as_str())
                    .bind(end_time.to_rfc3339())
                    .bind(id)
            }
            None => sqlx::query("UPDATE download_task SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id),
        };
        query.execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "failed to update status: {e}"
            )))
        })?;

        Ok(())
    }

    /// Replace a task's options overlay (single-row update)
    pub async fn update_options(&self, id: TaskId, options: &TaskOptions) -> Result<()> {
        let options = serde_json::to_string(options)?;
        sqlx::query("UPDATE download_task SET options = ? WHERE id = ?")
            .bind(options)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "failed to update options: {e}"
                )))
            })?;

        Ok(())
    }

    /// Delete a task row; returns whether a row existed
    pub async fn delete_task(&self, id: TaskId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_task WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "failed to delete task: {e}"
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete every row in `complete` or `error` status; returns the count
    pub async fn purge_results(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_task WHERE status IN ('complete', 'error')")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "failed to purge results: {e}"
                )))
            })?;

        Ok(result.rows_affected())
    }
}
