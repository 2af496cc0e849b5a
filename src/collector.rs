//! Per-task stat collection and status authority.
//!
//! The collector owns the registry of active [`SplitState`]s (shared with
//! the handlers that mutate them), samples download speed on a timer, and
//! is the single place that moves task rows into `complete`, `paused`,
//! `stopped`, and `error` — together with the matching checkpoint-file
//! effects: completion and stop delete the sidecar, pause and error keep
//! it so the task can be resumed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::split::SplitState;
use crate::types::{Status, TaskId};

struct CollectorInner {
    db: Arc<Database>,
    config: Arc<RwLock<Config>>,
    /// Active split states, shared by reference with the owning handlers
    active: Mutex<HashMap<TaskId, Arc<SplitState>>>,
    /// Bytes received per sample interval, keyed by task
    speed: Mutex<HashMap<TaskId, u64>>,
}

impl CollectorInner {
    fn snapshot_remains(&self) -> HashMap<TaskId, u64> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, split)| (*id, split.remaining_bytes()))
            .collect()
    }
}

/// In-memory registry of active downloads plus the periodic speed sampler
pub struct StatsCollector {
    inner: Arc<CollectorInner>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

impl StatsCollector {
    /// Create the collector and start its sampler task
    pub(crate) fn new(db: Arc<Database>, config: Arc<RwLock<Config>>) -> Self {
        let inner = Arc::new(CollectorInner {
            db,
            config,
            active: Mutex::new(HashMap::new()),
            speed: Mutex::new(HashMap::new()),
        });

        let sampler_inner = Arc::clone(&inner);
        let sampler = tokio::spawn(async move {
            let mut previous = sampler_inner.snapshot_remains();
            loop {
                let interval = sampler_inner.config.read().await.update_interval;
                tokio::time::sleep(Duration::from_secs_f64(interval.max(0.001))).await;

                let current = sampler_inner.snapshot_remains();
                {
                    let mut speed = sampler_inner
                        .speed
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    for (id, remain) in &current {
                        if let Some(before) = previous.get(id) {
                            // bytes per sample interval; a re-registered
                            // split can make the delta negative, clamp it
                            speed.insert(*id, before.saturating_sub(*remain));
                        }
                    }
                }
                previous = current;
            }
        });

        Self {
            inner,
            sampler: Mutex::new(Some(sampler)),
        }
    }

    /// Register (or replace) the split state for a task.
    ///
    /// Handlers call this twice: once with a placeholder before any
    /// fallible work, then with the real split. The second call replaces
    /// the first.
    pub fn task_add(&self, id: TaskId, split: Arc<SplitState>) {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, split);
    }

    /// Last sampled speed for a task, in bytes per sample interval
    pub fn speed_of(&self, id: TaskId) -> Option<u64> {
        self.inner
            .speed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    /// Whether a task is currently registered
    pub fn is_active(&self, id: TaskId) -> bool {
        self.inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn take_active(&self, id: TaskId) -> Option<Arc<SplitState>> {
        let split = self
            .inner
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.inner
            .speed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        split
    }

    /// Mark a task complete: delete its checkpoint, stamp `end_time`, and
    /// drop it from the registry. Requires the task to be active.
    pub async fn task_complete(&self, id: TaskId) -> Result<()> {
        if !self.is_active(id) {
            return Err(Error::NotActive(id));
        }
        let task = self.inner.db.require_task(id).await?;
        let (now, suffix) = {
            let config = self.inner.config.read().await;
            (config.now(), config.overlay(&task.options).tempfile_suffix)
        };

        remove_checkpoint(&task.checkpoint_path(&suffix))?;
        self.inner
            .db
            .update_status(id, Status::Complete, Some(now))
            .await?;
        self.take_active(id);
        tracing::info!(task_id = id.0, "task complete");
        Ok(())
    }

    /// Mark a task paused and persist its checkpoint. Requires the task to
    /// be active; the checkpoint file is NOT deleted.
    pub async fn task_pause(&self, id: TaskId) -> Result<()> {
        let split = {
            let active = self
                .inner
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            active.get(&id).cloned().ok_or(Error::NotActive(id))?
        };
        let task = self.inner.db.require_task(id).await?;
        let suffix = {
            let config = self.inner.config.read().await;
            config.overlay(&task.options).tempfile_suffix
        };

        split.write_checkpoint(&task.checkpoint_path(&suffix))?;
        self.inner
            .db
            .update_status(id, Status::Paused, None)
            .await?;
        self.take_active(id);
        tracing::info!(task_id = id.0, "task paused");
        Ok(())
    }

    /// Mark a task stopped: delete its checkpoint and stamp `end_time`.
    ///
    /// Idempotent, and operates on any stored row — a paused task can be
    /// stopped without being active. A missing row is [`Error::NotFound`].
    pub async fn task_stop(&self, id: TaskId) -> Result<()> {
        let task = self.inner.db.require_task(id).await?;
        let (now, suffix) = {
            let config = self.inner.config.read().await;
            (config.now(), config.overlay(&task.options).tempfile_suffix)
        };

        remove_checkpoint(&task.checkpoint_path(&suffix))?;
        self.inner
            .db
            .update_status(id, Status::Stopped, Some(now))
            .await?;
        self.take_active(id);
        tracing::info!(task_id = id.0, "task stopped");
        Ok(())
    }

    /// Mark a task errored and stamp `end_time`.
    ///
    /// The checkpoint is kept so the operator may unpause and resume.
    pub async fn task_error(&self, id: TaskId) -> Result<()> {
        let now = self.inner.config.read().await.now();
        self.inner
            .db
            .update_status(id, Status::Error, Some(now))
            .await?;
        self.take_active(id);
        tracing::warn!(task_id = id.0, "task errored");
        Ok(())
    }

    /// Persist checkpoints for every active task, then stop the sampler.
    ///
    /// Called once during shutdown; active tasks stay `downloading` in the
    /// store so startup recovery resumes them.
    pub async fn close(&self) {
        let active: Vec<(TaskId, Arc<SplitState>)> = {
            let active = self
                .inner
                .active
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            active.iter().map(|(id, s)| (*id, Arc::clone(s))).collect()
        };

        for (id, split) in active {
            let task = match self.inner.db.get_task(id).await {
                Ok(Some(task)) => task,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(task_id = id.0, error = %e, "skipping checkpoint on close");
                    continue;
                }
            };
            let suffix = {
                let config = self.inner.config.read().await;
                config.overlay(&task.options).tempfile_suffix
            };
            if let Err(e) = split.write_checkpoint(&task.checkpoint_path(&suffix)) {
                tracing::warn!(task_id = id.0, error = %e, "failed to write checkpoint on close");
            }
        }

        let sampler = self
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sampler) = sampler {
            sampler.abort();
            sampler.await.ok();
        }
    }
}

fn remove_checkpoint(path: &std::path::Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
