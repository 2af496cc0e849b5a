//! Startup recovery, shutdown, and idle waiting.

use crate::error::Result;
use crate::types::{Event, Status};

use super::CoreProcess;
use super::control::wait_settled;

impl CoreProcess {
    /// Resume tasks interrupted by a crash and notify plugins.
    ///
    /// Rows still in `downloading` status are the ones a previous process
    /// never moved to a terminal state; each is re-run with `resume = true`
    /// so an existing checkpoint is honored.
    pub async fn startup(&self) -> Result<()> {
        let interrupted = self.engine.db.list_by_status(Status::Downloading).await?;
        for task in interrupted {
            match self.select_handler(&task.uri) {
                Some(handler) => {
                    tracing::info!(task_id = task.id.0, uri = %task.uri, "resuming interrupted task");
                    self.spawn_task(handler, task, true).await;
                }
                None => {
                    tracing::warn!(
                        task_id = task.id.0,
                        uri = %task.uri,
                        "no handler accepts stored uri, leaving task as-is"
                    );
                }
            }
        }

        self.engine
            .plugins
            .dispatch(|p| async move { p.on_startup().await })
            .await;
        self.engine.emit(Event::Startup);
        Ok(())
    }

    /// Graceful shutdown: checkpoint active tasks, stop the sampler,
    /// notify plugins, and await in-flight notification units.
    ///
    /// Rows of still-active tasks stay `downloading`, which is exactly the
    /// state [`CoreProcess::startup`] recovers from.
    pub async fn shutdown(&self) -> Result<()> {
        self.engine.collector().close().await;

        self.engine
            .plugins
            .dispatch(|p| async move { p.on_shutdown().await })
            .await;
        self.engine.emit(Event::Shutdown);

        self.engine.dispatch_tasks.close();
        self.engine.dispatch_tasks.wait().await;
        Ok(())
    }

    /// Block until no task is pending
    pub async fn wait(&self) {
        wait_settled(self.idle.subscribe()).await;
    }
}
