//! The top-level orchestrator, split into focused submodules:
//! - [`add`] - URI intake, destination resolution, task spawning
//! - [`control`] - pause / stop / remove / unpause
//! - [`status`] - status queries and option management
//! - [`lifecycle`] - startup recovery, shutdown, idle waiting

mod add;
mod control;
mod lifecycle;
mod status;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{RwLock, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::collector::StatsCollector;
use crate::config::{Config, TaskOptions};
use crate::db::Database;
use crate::downloader::{DownloaderRegistry, HttpDownloader};
use crate::error::{Error, Result};
use crate::handler::{Handler, HttpHandler};
use crate::plugin::{Plugin, PluginSet};
use crate::types::{Event, TaskId};

/// Shared engine services handed to handlers.
///
/// Handlers receive a reference on every call instead of holding one, so a
/// handler can be registered before the engine exists.
pub struct EngineHandle {
    pub(crate) db: Arc<Database>,
    pub(crate) config: Arc<RwLock<Config>>,
    pub(crate) collector: StatsCollector,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) plugins: PluginSet,
    pub(crate) downloaders: DownloaderRegistry,
    /// Detached dispatch units; kept strongly referenced here and awaited
    /// on shutdown so notifications are never dropped mid-flight
    pub(crate) dispatch_tasks: TaskTracker,
}

impl EngineHandle {
    /// The stats collector (split-state registry and status authority)
    pub fn collector(&self) -> &StatsCollector {
        &self.collector
    }

    /// The downloader factory registry
    pub fn downloaders(&self) -> &DownloaderRegistry {
        &self.downloaders
    }

    /// The effective configuration for a task: global config with the
    /// task's options overlaid
    pub async fn effective_config(&self, options: &TaskOptions) -> Config {
        self.config.read().await.overlay(options)
    }

    /// Transition the task to `error`, emit the event, and notify plugins.
    ///
    /// Handlers call this once per failure and then re-raise the error so
    /// the completion callback knows not to mark the task complete.
    pub async fn report_error(&self, id: TaskId, error: &Error) {
        if let Err(e) = self.collector.task_error(id).await {
            tracing::error!(task_id = id.0, error = %e, "failed to record task error");
        }
        let message = error.to_string();
        let trace = format!("{error:?}");
        self.emit(Event::DownloadError {
            id,
            error: message.clone(),
        });
        self.dispatch_nowait(move |p| {
            let message = message.clone();
            let trace = trace.clone();
            Box::pin(async move { p.on_download_error(id, &message, &trace).await })
        });
    }

    /// Send an event to broadcast subscribers (dropped if nobody listens)
    pub(crate) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Fire a plugin notification without waiting for it.
    ///
    /// The unit runs detached but tracked, so shutdown can await it.
    pub(crate) fn dispatch_nowait<F>(&self, make: F)
    where
        F: Fn(Arc<dyn Plugin>) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let plugins = self.plugins.snapshot_enabled();
        self.dispatch_tasks.spawn(async move {
            futures::future::join_all(plugins.into_iter().map(make)).await;
        });
    }
}

/// A task currently executing in the process
#[derive(Clone)]
pub(crate) struct PendingTask {
    /// Cancellation handle; triggering it unwinds every block worker
    pub(crate) cancel: CancellationToken,
    /// Becomes `true` the moment the handler future settles, before status
    /// bookkeeping runs — pause/stop await this so checkpoints see final
    /// cursors
    pub(crate) settled: watch::Receiver<bool>,
}

/// The download engine: task lifecycle, startup recovery, and the
/// user-facing operations.
///
/// Cloneable — all state is shared behind `Arc`s, so clones drive the same
/// engine.
#[derive(Clone)]
pub struct CoreProcess {
    pub(crate) engine: Arc<EngineHandle>,
    /// Registered handlers, consulted in registration order
    pub(crate) handlers: Arc<std::sync::RwLock<Vec<Arc<dyn Handler>>>>,
    /// Tasks currently executing, keyed by id
    pub(crate) pending: Arc<tokio::sync::Mutex<HashMap<TaskId, PendingTask>>>,
    /// `true` whenever no task is pending; `wait()` blocks on it
    pub(crate) idle: Arc<watch::Sender<bool>>,
}

impl CoreProcess {
    /// Create an engine: open the store, run migrations, start the
    /// collector, and register the default HTTP handler.
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "failed to create download directory '{}': {e}",
                    config.dir.display()
                ),
            ))
        })?;

        let db = Arc::new(Database::connect(&config.database, config.debug).await?);
        let config = Arc::new(RwLock::new(config));
        let collector = StatsCollector::new(Arc::clone(&db), Arc::clone(&config));

        // buffered so a burst of events survives a slow subscriber
        let (event_tx, _rx) = broadcast::channel(1000);

        let engine = Arc::new(EngineHandle {
            db,
            config,
            collector,
            event_tx,
            plugins: PluginSet::default(),
            downloaders: DownloaderRegistry::new(),
            dispatch_tasks: TaskTracker::new(),
        });

        let handlers: Vec<Arc<dyn Handler>> = vec![Arc::new(HttpHandler::new())];

        let (idle, _) = watch::channel(true);

        Ok(Self {
            engine,
            handlers: Arc::new(std::sync::RwLock::new(handlers)),
            pending: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            idle: Arc::new(idle),
        })
    }

    /// Register a handler; later registrations lose scope ties to earlier
    /// ones.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(handler);
    }

    /// Register a plugin (enabled by default)
    pub fn register_plugin(&self, plugin: Arc<dyn Plugin>) {
        self.engine.plugins.register(plugin);
    }

    /// Register an HTTP downloader factory under a short name
    pub fn register_downloader<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Config) -> Result<Arc<dyn HttpDownloader>> + Send + Sync + 'static,
    {
        self.engine.downloaders.register(name, factory);
    }

    /// Enable a registered plugin by name
    pub fn enable_plugin(&self, name: &str) {
        self.engine.plugins.set_enabled(name, true);
    }

    /// Disable a registered plugin by name
    pub fn disable_plugin(&self, name: &str) {
        self.engine.plugins.set_enabled(name, false);
    }

    /// Names of all registered plugins
    pub fn plugin_names(&self) -> Vec<String> {
        self.engine.plugins.names()
    }

    /// Subscribe to lifecycle events.
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.engine.event_tx.subscribe()
    }

    /// The crate version
    pub fn get_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// First registered handler whose scope accepts the URI
    pub(crate) fn select_handler(&self, uri: &str) -> Option<Arc<dyn Handler>> {
        self.handlers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .find(|h| h.check_scope(uri))
            .cloned()
    }
}
