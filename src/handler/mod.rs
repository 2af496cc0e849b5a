//! Per-URI-scheme execution strategies.
//!
//! A handler owns the whole execution of one task: pre-allocation, range
//! splitting, spawning block workers, positional writes, and error
//! signalling. [`crate::CoreProcess`] picks the first registered handler
//! whose `check_scope` accepts the URI, so registration order decides ties.
//!
//! - [`http::HttpHandler`] — `http://` / `https://`, registered by default
//! - [`ranged::RangedHandler`] — offset + count transports (FTP/SFTP),
//!   generic over a [`crate::downloader::RangedDownloader`] factory

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TaskOptions};
use crate::core::EngineHandle;
use crate::db::Task;
use crate::downloader::ByteStream;
use crate::error::{Error, Result};
use crate::fileio::{self, FileIo};
use crate::split::{Block, SplitState};
use crate::types::FileMetadata;

pub mod http;
pub mod ranged;

pub use http::HttpHandler;
pub use ranged::RangedHandler;

/// Per-URI-scheme strategy owning task execution
#[async_trait]
pub trait Handler: Send + Sync {
    /// Registration name, for logs
    fn name(&self) -> &str;

    /// Whether this handler wants the URI
    fn check_scope(&self, uri: &str) -> bool;

    /// Negotiate `(size, name, range_supported)` with the remote server
    async fn file_metadata(
        &self,
        engine: &EngineHandle,
        uri: &str,
        options: &TaskOptions,
    ) -> Result<FileMetadata>;

    /// Execute the task until completion, cancellation, or error.
    ///
    /// Cancellation must be transparent: release resources and return
    /// [`Error::Cancelled`] without touching the stored status. Any other
    /// error must already have been reported through
    /// [`EngineHandle::report_error`] before it is returned.
    async fn handle(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Drain `stream` into `file`, writing each chunk at the block's cursor and
/// advancing it by the bytes written.
///
/// Cancellation wins races against pending reads and surfaces as
/// [`Error::Cancelled`]; the stream is released on every exit path.
pub(crate) async fn run_stream(
    file: &Arc<FileIo>,
    effective: &Config,
    mut stream: Box<dyn ByteStream>,
    block: &Block,
    cancel: &CancellationToken,
) -> Result<()> {
    let result = async {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            let offset = block.cursor();
            let written = if effective.fileio_async {
                fileio::pwrite_async(Arc::clone(file), chunk, offset).await?
            } else {
                file.pwrite(&chunk, offset)?
            };
            block.advance(written as u64);
        }
    }
    .await;
    stream.release().await.ok();
    result
}

/// Load the checkpoint for a resumed task, falling back to a fresh split
/// when the sidecar is missing or corrupt.
pub(crate) fn split_for(
    task: &Task,
    resume: bool,
    filesize: u64,
    effective: &Config,
) -> SplitState {
    if resume {
        let checkpoint = task.checkpoint_path(&effective.tempfile_suffix);
        match SplitState::load_checkpoint(&checkpoint) {
            Ok(Some(split)) => return split,
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    task_id = task.id.0,
                    error = %e,
                    "unreadable checkpoint, using a fresh split"
                );
            }
        }
    }
    SplitState::divide(filesize, effective.split)
}

/// Verify a block worker wrote exactly its declared range
pub(crate) fn check_block_complete(block: &Block, index: usize) -> Result<()> {
    let expected = (block.end() + 1) as u64;
    if block.cursor() != expected {
        return Err(Error::IncompleteBlock {
            index,
            cursor: block.cursor(),
            expected,
        });
    }
    Ok(())
}
