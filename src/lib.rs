//! # getex
//!
//! Resumable, multi-connection download engine library.
//!
//! getex accepts a URI, negotiates file metadata with the remote server,
//! splits the byte range across concurrent block workers, writes received
//! bytes at arbitrary file offsets, persists task state durably, and
//! provides lifecycle control (pause/unpause/stop/remove) with clean
//! cancellation and restart-after-crash.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or RPC surface, purely a crate for embedding
//! - **Crash-consistent** - interrupted tasks are resumed on startup from
//!   their checkpoint sidecars
//! - **Pluggable** - handlers, downloaders, and plugins are explicit
//!   registrations, so new schemes and transports slot in without touching
//!   the engine
//!
//! ## Quick Start
//!
//! ```no_run
//! use getex::{Config, CoreProcess, TaskOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let core = CoreProcess::new(Config::default()).await?;
//!     core.startup().await?;
//!
//!     // Subscribe to events
//!     let mut events = core.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     core.add("https://example.com/big.iso", TaskOptions::default())
//!         .await?;
//!     core.wait().await;
//!     core.shutdown().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Per-task stat collection and status transitions
pub mod collector;
/// Configuration types
pub mod config;
/// The top-level orchestrator
pub mod core;
/// Store persistence layer
pub mod db;
/// Per-protocol downloader contracts and registry
pub mod downloader;
/// Error types
pub mod error;
/// Positional file IO backends
pub mod fileio;
/// Per-scheme execution strategies
pub mod handler;
/// Typed plugin observers
pub mod plugin;
/// Retry logic with exponential backoff
pub mod retry;
/// Block bookkeeping and checkpoints
pub mod split;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use collector::StatsCollector;
pub use config::{Config, TaskOptions};
pub use crate::core::{CoreProcess, EngineHandle};
pub use db::{Database, Task};
pub use downloader::{
    ByteStream, DownloaderRegistry, HttpDownloader, HttpResponse, RangedDownloader,
    ReqwestDownloader,
};
pub use error::{DatabaseError, Error, Result};
pub use fileio::{FileIo, FileIoMode};
pub use handler::{Handler, HttpHandler, RangedHandler};
pub use plugin::Plugin;
pub use split::{Block, SplitState};
pub use types::{Event, FileMetadata, Status, TaskId};

/// Run the engine until a termination signal arrives, then shut down.
///
/// - **Unix:** listens for SIGTERM and SIGINT
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`
pub async fn run_with_shutdown(core: CoreProcess) -> Result<()> {
    wait_for_signal().await;
    core.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        _ => {
            // restricted environments (containers, tests) may refuse
            // signal registration; fall back to ctrl_c
            tracing::warn!("could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
    }
}
