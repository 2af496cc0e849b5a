//! Typed plugin observers.
//!
//! Plugins implement the subset of lifecycle hooks they care about; every
//! method has a default no-op body. Registration is explicit (no dynamic
//! discovery): call [`crate::CoreProcess::register_plugin`] before
//! `startup`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::config::TaskOptions;
use crate::types::TaskId;

/// Lifecycle observer for the download engine
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registration name; also the key in dispatch result maps
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Called once after startup recovery has spawned interrupted tasks
    async fn on_startup(&self) {}

    /// Called during graceful shutdown
    async fn on_shutdown(&self) {}

    /// Offered every URI passed to `add`.
    ///
    /// Return replacement URIs to expand or rewrite the request; when every
    /// enabled plugin returns an empty set, the original URI is used as-is.
    async fn on_add_uri(&self, _uri: &str, _options: &TaskOptions) -> Vec<String> {
        Vec::new()
    }

    /// A handler execution was spawned for the task
    async fn on_download_start(&self, _id: TaskId) {}

    /// The task was paused and its checkpoint written
    async fn on_download_pause(&self, _id: TaskId) {}

    /// The task was stopped
    async fn on_download_stop(&self, _id: TaskId) {}

    /// The task finished downloading
    async fn on_download_complete(&self, _id: TaskId) {}

    /// The task failed.
    ///
    /// `error` is the display message; `trace` is the error's debug
    /// rendering, the closest thing to a stack trace the engine has.
    async fn on_download_error(&self, _id: TaskId, _error: &str, _trace: &str) {}
}

struct PluginEntry {
    plugin: Arc<dyn Plugin>,
    enabled: AtomicBool,
}

/// The registered plugins, in registration order
#[derive(Default)]
pub(crate) struct PluginSet {
    entries: std::sync::RwLock<Vec<PluginEntry>>,
}

impl PluginSet {
    fn entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<PluginEntry>> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub(crate) fn register(&self, plugin: Arc<dyn Plugin>) {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(PluginEntry {
                plugin,
                enabled: AtomicBool::new(true),
            });
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| e.plugin.name().to_string())
            .collect()
    }

    pub(crate) fn set_enabled(&self, name: &str, enabled: bool) {
        for entry in self.entries().iter() {
            if entry.plugin.name() == name {
                entry.enabled.store(enabled, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn is_enabled(&self, name: &str) -> Option<bool> {
        self.entries()
            .iter()
            .find(|e| e.plugin.name() == name)
            .map(|e| e.enabled.load(Ordering::Relaxed))
    }

    /// Owned snapshot of the enabled plugins, for detached dispatch units
    pub(crate) fn snapshot_enabled(&self) -> Vec<Arc<dyn Plugin>> {
        self.entries()
            .iter()
            .filter(|e| e.enabled.load(Ordering::Relaxed))
            .map(|e| Arc::clone(&e.plugin))
            .collect()
    }

    /// Run `call` on every enabled plugin concurrently and return the
    /// results as a stable name → result mapping.
    pub(crate) async fn dispatch<F, Fut, R>(&self, call: F) -> BTreeMap<String, R>
    where
        F: Fn(Arc<dyn Plugin>) -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let plugins = self.snapshot_enabled();
        let names: Vec<String> = plugins.iter().map(|p| p.name().to_string()).collect();
        let results = futures::future::join_all(plugins.into_iter().map(call)).await;
        names.into_iter().zip(results).collect()
    }
}
