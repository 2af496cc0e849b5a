//! Task lifecycle control — pause, stop, remove, unpause.

use futures::future::join_all;
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::{Event, Status, TaskId};

use super::CoreProcess;

impl CoreProcess {
    /// Pause an executing task.
    ///
    /// Cancels the handler, waits for it to settle so the cursors are
    /// final, then persists `paused` and the checkpoint. The id must be in
    /// the pending map ([`Error::NotActive`] otherwise).
    pub async fn pause(&self, id: TaskId) -> Result<()> {
        let entry = self
            .pending
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(Error::NotActive(id))?;

        entry.cancel.cancel();
        wait_settled(entry.settled).await;

        self.engine.collector().task_pause(id).await?;
        self.engine.emit(Event::Paused { id });
        self.engine
            .dispatch_nowait(move |p| Box::pin(async move { p.on_download_pause(id).await }));
        Ok(())
    }

    /// Pause every executing task, concurrently.
    ///
    /// Failures on individual tasks (e.g. one finishing in the window) are
    /// logged and do not stop the sweep.
    pub async fn pause_all(&self) {
        let ids: Vec<TaskId> = self.pending.lock().await.keys().copied().collect();
        let results = join_all(ids.iter().map(|id| self.pause(*id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(task_id = id.0, error = %e, "failed to pause task during pause_all");
            }
        }
    }

    /// Stop a task.
    ///
    /// If the task is executing it is cancelled and awaited first; either
    /// way the stored row transitions to `stopped` and the checkpoint is
    /// deleted. Idempotent — stopping a stopped (or paused) task succeeds.
    pub async fn stop(&self, id: TaskId) -> Result<()> {
        let entry = self.pending.lock().await.get(&id).cloned();
        if let Some(entry) = entry {
            entry.cancel.cancel();
            wait_settled(entry.settled).await;
        }

        self.engine.collector().task_stop(id).await?;
        self.engine.emit(Event::Stopped { id });
        self.engine
            .dispatch_nowait(move |p| Box::pin(async move { p.on_download_stop(id).await }));
        Ok(())
    }

    /// Stop a task and delete its row from the store
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        self.stop(id).await?;
        self.engine.db.delete_task(id).await?;
        Ok(())
    }

    /// Resume a paused (or errored) task.
    ///
    /// The row transitions back to `downloading` before the handler spawns
    /// with `resume = true`, so a crash mid-resume is itself recoverable.
    pub async fn unpause(&self, id: TaskId) -> Result<()> {
        if self.is_pending(id).await {
            return Err(Error::AlreadyActive(id));
        }

        let task = self.engine.db.require_task(id).await?;
        if !matches!(task.status, Status::Paused | Status::Error) {
            return Err(Error::InvalidState {
                id,
                operation: "unpause",
                status: task.status.to_string(),
            });
        }

        let handler = self
            .select_handler(&task.uri)
            .ok_or_else(|| Error::NoHandler(task.uri.clone()))?;

        self.engine
            .db
            .update_status(id, Status::Downloading, None)
            .await?;
        self.spawn_task(handler, task, true).await;
        Ok(())
    }

    /// Resume every paused task.
    ///
    /// Individual failures are logged and do not stop the sweep.
    pub async fn unpause_all(&self) -> Result<()> {
        let paused = self.engine.db.list_by_status(Status::Paused).await?;
        for task in paused {
            if let Err(e) = self.unpause(task.id).await {
                tracing::warn!(
                    task_id = task.id.0,
                    error = %e,
                    "failed to unpause task during unpause_all"
                );
            }
        }
        Ok(())
    }
}

/// Wait until the handler future has settled (ran to its end, whether by
/// completing, erroring, or observing cancellation).
pub(crate) async fn wait_settled(mut settled: watch::Receiver<bool>) {
    while !*settled.borrow_and_update() {
        if settled.changed().await.is_err() {
            break;
        }
    }
}
