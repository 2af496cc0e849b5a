//! Status queries and option management.

use crate::config::{Config, TaskOptions};
use crate::db::Task;
use crate::error::Result;
use crate::types::{Status, TaskId};

use super::CoreProcess;

impl CoreProcess {
    /// The stored task, with `speed` populated from the collector's latest
    /// sample (bytes per sample interval).
    pub async fn tell_status(&self, id: TaskId) -> Result<Task> {
        let mut task = self.engine.db.require_task(id).await?;
        task.speed = self.engine.collector().speed_of(id).map(|b| b as f64);
        Ok(task)
    }

    /// Ids of every task currently executing
    pub async fn tell_active(&self) -> Vec<TaskId> {
        self.pending.lock().await.keys().copied().collect()
    }

    /// A page of paused task ids, oldest first
    pub async fn tell_paused(&self, offset: u32, count: u32) -> Result<Vec<TaskId>> {
        Ok(self
            .engine
            .db
            .list_by_status_page(Status::Paused, offset, count)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    /// A page of stopped task ids, oldest first
    pub async fn tell_stopped(&self, offset: u32, count: u32) -> Result<Vec<TaskId>> {
        Ok(self
            .engine
            .db
            .list_by_status_page(Status::Stopped, offset, count)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect())
    }

    /// The task's stored option overlay
    pub async fn get_option(&self, id: TaskId) -> Result<TaskOptions> {
        Ok(self.engine.db.require_task(id).await?.options)
    }

    /// Merge new options into the task's stored overlay (single-row
    /// update). Takes effect the next time the task is (re)started.
    pub async fn change_option(&self, id: TaskId, options: TaskOptions) -> Result<()> {
        let mut task = self.engine.db.require_task(id).await?;
        task.options.merge(options);
        self.engine.db.update_options(id, &task.options).await
    }

    /// A snapshot of the global configuration
    pub async fn get_global_option(&self) -> Config {
        self.engine.config.read().await.clone()
    }

    /// Merge a JSON object of overrides into the global configuration.
    ///
    /// Already-running tasks keep the configuration they started with; the
    /// sampler picks up a changed `update_interval` on its next tick.
    pub async fn change_global_option(&self, options: serde_json::Value) -> Result<()> {
        self.engine.config.write().await.merge_global(options)
    }

    /// Delete every row in `complete` or `error` status; returns the count
    pub async fn purge_download_result(&self) -> Result<u64> {
        self.engine.db.purge_results().await
    }
}
