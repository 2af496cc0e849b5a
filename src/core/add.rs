//! URI intake: plugin expansion, metadata negotiation, destination
//! resolution, row persistence, and task spawning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::TaskOptions;
use crate::db::{NewTask, Task};
use crate::error::Result;
use crate::handler::Handler;
use crate::types::{Event, TaskId};

use super::{CoreProcess, PendingTask};

impl CoreProcess {
    /// Add a URI (or whatever the enabled plugins expand it into).
    ///
    /// Returns as soon as metadata is negotiated and the rows exist; the
    /// downloads themselves run in the background. URIs no registered
    /// handler accepts are skipped with a warning, matching the behavior
    /// of repeated manual adds.
    pub async fn add(&self, uri: &str, options: TaskOptions) -> Result<Vec<Task>> {
        // let plugins rewrite or expand the request; the union of their
        // non-empty answers replaces the original URI
        let expansions = self
            .engine
            .plugins
            .dispatch(|plugin| {
                let uri = uri.to_string();
                let options = options.clone();
                async move { plugin.on_add_uri(&uri, &options).await }
            })
            .await;
        let expanded: BTreeSet<String> = expansions.into_values().flatten().collect();
        let uris: Vec<String> = if expanded.is_empty() {
            vec![uri.to_string()]
        } else {
            expanded.into_iter().collect()
        };

        let mut tasks = Vec::new();
        for uri in uris {
            let Some(handler) = self.select_handler(&uri) else {
                tracing::warn!(uri = %uri, "no handler accepts uri, skipping");
                continue;
            };

            let metadata = handler.file_metadata(&self.engine, &uri, &options).await?;

            let effective = self.engine.effective_config(&options).await;
            tokio::fs::create_dir_all(&effective.dir).await?;
            let path = resolve_destination(&effective.dir, &metadata.filename);

            let start_time = self.engine.config.read().await.now();
            let id = self
                .engine
                .db
                .insert_task(&NewTask {
                    uri: uri.clone(),
                    filesize: metadata.filesize,
                    path: path.display().to_string(),
                    support_range: metadata.support_range,
                    options: options.clone(),
                    start_time,
                })
                .await?;
            let task = self.engine.db.require_task(id).await?;

            tracing::info!(
                task_id = id.0,
                uri = %uri,
                path = %path.display(),
                filesize = ?metadata.filesize,
                support_range = metadata.support_range,
                "task added"
            );

            self.spawn_task(handler, task.clone(), false).await;
            tasks.push(task);
        }
        Ok(tasks)
    }

    /// Spawn a handler execution as a cancellable unit and register it in
    /// the pending map.
    ///
    /// The completion callback marks the task complete only when the
    /// handler finished normally; cancellation and errors leave the status
    /// to whoever already decided it (pause/stop/`report_error`).
    pub(crate) async fn spawn_task(&self, handler: Arc<dyn Handler>, task: Task, resume: bool) {
        let id = task.id;
        let cancel = CancellationToken::new();
        let (settled_tx, settled_rx) = watch::channel(false);

        {
            let mut pending = self.pending.lock().await;
            pending.insert(
                id,
                PendingTask {
                    cancel: cancel.clone(),
                    settled: settled_rx,
                },
            );
        }
        self.idle.send_replace(false);

        self.engine.emit(Event::Started { id });
        self.engine
            .dispatch_nowait(move |p| Box::pin(async move { p.on_download_start(id).await }));

        let core = self.clone();
        tokio::spawn(async move {
            let result = handler.handle(&core.engine, &task, resume, cancel).await;

            // cursors are final; let pause/stop proceed with checkpointing
            settled_tx.send_replace(true);

            match result {
                Ok(()) => {
                    match core.engine.collector().task_complete(id).await {
                        Ok(()) => {
                            core.engine.emit(Event::Complete { id });
                            core.engine.dispatch_nowait(move |p| {
                                Box::pin(async move { p.on_download_complete(id).await })
                            });
                        }
                        Err(e) => {
                            tracing::error!(task_id = id.0, error = %e, "failed to mark task complete");
                        }
                    }
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(task_id = id.0, "task cancelled");
                }
                Err(e) => {
                    // status is already `error`; the handler reported it
                    tracing::debug!(task_id = id.0, error = %e, "task failed");
                }
            }

            let mut pending = core.pending.lock().await;
            pending.remove(&id);
            if pending.is_empty() {
                core.idle.send_replace(true);
            }
        });
    }

    /// Whether the id is currently executing
    pub(crate) async fn is_pending(&self, id: TaskId) -> bool {
        self.pending.lock().await.contains_key(&id)
    }
}

/// Join `dir` and `filename`, inserting `"(1)"` before the extension while
/// the path exists on disk.
///
/// Best-effort: a concurrent add can win the race, in which case exclusive
/// pre-allocation surfaces the collision as an I/O error.
fn resolve_destination(dir: &Path, filename: &str) -> PathBuf {
    let mut path = dir.join(filename);
    while path.exists() {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let renamed = match path.extension() {
            Some(ext) => format!("{stem}(1).{}", ext.to_string_lossy()),
            None => format!("{stem}(1)"),
        };
        path = path.with_file_name(renamed);
    }
    path
}
