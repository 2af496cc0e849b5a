//! Handler for offset + count transports (FTP/SFTP-shaped).
//!
//! The wire clients themselves are external collaborators; this handler
//! drives any [`RangedDownloader`] produced by the registered factory, so
//! one implementation covers FTP, SFTP, and anything else that can open a
//! stream at an offset.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TaskOptions};
use crate::core::EngineHandle;
use crate::db::Task;
use crate::downloader::RangedDownloader;
use crate::error::{Error, Result};
use crate::fileio::{FileIo, pre_alloc_file};
use crate::split::SplitState;
use crate::types::FileMetadata;

use super::{Handler, check_block_complete, run_stream, split_for};

/// Factory producing a ranged transport from the effective configuration
pub type RangedDownloaderFactory =
    Arc<dyn Fn(&Config) -> Result<Arc<dyn RangedDownloader>> + Send + Sync>;

/// Handler generic over an offset + count transport
pub struct RangedHandler {
    name: String,
    scope: Regex,
    factory: RangedDownloaderFactory,
}

impl RangedHandler {
    /// Create a handler with an explicit name, scope pattern, and transport
    /// factory
    pub fn new<F>(name: impl Into<String>, scope: Regex, factory: F) -> Self
    where
        F: Fn(&Config) -> Result<Arc<dyn RangedDownloader>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            scope,
            factory: Arc::new(factory),
        }
    }

    /// An FTP-scoped handler (`ftp://`)
    #[allow(clippy::unwrap_used)]
    pub fn ftp<F>(factory: F) -> Self
    where
        F: Fn(&Config) -> Result<Arc<dyn RangedDownloader>> + Send + Sync + 'static,
    {
        Self::new("ftp", Regex::new(r"^ftp://\S+").unwrap(), factory)
    }

    /// An SFTP-scoped handler (`sftp://`)
    #[allow(clippy::unwrap_used)]
    pub fn sftp<F>(factory: F) -> Self
    where
        F: Fn(&Config) -> Result<Arc<dyn RangedDownloader>> + Send + Sync + 'static,
    {
        Self::new("sftp", Regex::new(r"^sftp://\S+").unwrap(), factory)
    }

    async fn run(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let effective = engine.effective_config(&task.options).await;
        let downloader = (self.factory)(&effective)?;
        let path = Path::new(&task.path);

        if let Some(filesize) = task.filesize
            && !resume
        {
            pre_alloc_file(path, filesize, true)?;
        }
        let file = Arc::new(FileIo::open(path, effective.fileio)?);

        match task.filesize {
            Some(filesize) if task.support_range && filesize > 0 => {
                self.run_ranged(
                    engine, task, resume, cancel, &effective, downloader, file, filesize,
                )
                .await
            }
            _ => {
                let split = Arc::new(SplitState::single(task.filesize));
                engine.collector().task_add(task.id, Arc::clone(&split));
                let stream = downloader.open(&task.uri, 0, task.filesize).await?;
                run_stream(&file, &effective, stream, &split.blocks()[0], cancel).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_ranged(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: &CancellationToken,
        effective: &Config,
        downloader: Arc<dyn RangedDownloader>,
        file: Arc<FileIo>,
        filesize: u64,
    ) -> Result<()> {
        let split = Arc::new(split_for(task, resume, filesize, effective));
        engine.collector().task_add(task.id, Arc::clone(&split));

        let effective = Arc::new(effective.clone());
        let mut workers = JoinSet::new();
        for index in 0..split.len() {
            workers.spawn(block_download(
                Arc::clone(&downloader),
                Arc::clone(&file),
                Arc::clone(&split),
                index,
                task.uri.clone(),
                Arc::clone(&effective),
                cancel.clone(),
            ));
        }

        let mut first_error: Option<Error> = None;
        while let Some(joined) = workers.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) if e.is_cancelled() => continue,
                Ok(Err(e)) => e,
                Err(join_error) => Error::Transport(format!("block worker died: {join_error}")),
            };
            if first_error.is_none() {
                cancel.cancel();
                first_error = Some(failure);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

/// Download one block: open at the cursor for `end - cursor + 1` bytes.
async fn block_download(
    downloader: Arc<dyn RangedDownloader>,
    file: Arc<FileIo>,
    split: Arc<SplitState>,
    index: usize,
    uri: String,
    effective: Arc<Config>,
    cancel: CancellationToken,
) -> Result<()> {
    let block = &split.blocks()[index];
    if !block.is_unfinished() {
        return Ok(());
    }

    let count = (block.end() as u64 + 1) - block.cursor();
    let stream = downloader.open(&uri, block.cursor(), Some(count)).await?;
    run_stream(&file, &effective, stream, block, &cancel).await?;
    check_block_complete(block, index)
}

#[async_trait]
impl Handler for RangedHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_scope(&self, uri: &str) -> bool {
        self.scope.is_match(uri)
    }

    async fn file_metadata(
        &self,
        engine: &EngineHandle,
        uri: &str,
        options: &TaskOptions,
    ) -> Result<FileMetadata> {
        let effective = engine.effective_config(options).await;
        let downloader = (self.factory)(&effective)?;
        let mut metadata = downloader.metadata(uri).await?;
        if let Some(out) = &effective.out {
            metadata.filename = out.clone();
        }
        Ok(metadata)
    }

    async fn handle(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        engine
            .collector()
            .task_add(task.id, Arc::new(SplitState::streaming()));

        match self.run(engine, task, resume, &cancel).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                engine.report_error(task.id, &e).await;
                Err(e)
            }
        }
    }
}
