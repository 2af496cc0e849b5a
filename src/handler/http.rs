//! HTTP(S) handler.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{HeaderValue, RANGE};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TaskOptions};
use crate::core::EngineHandle;
use crate::db::Task;
use crate::downloader::{HttpDownloader, build_headers, probe};
use crate::error::{Error, Result};
use crate::fileio::{FileIo, pre_alloc_file};
use crate::split::SplitState;
use crate::types::FileMetadata;

use super::{Handler, check_block_complete, run_stream, split_for};

/// Handler for `http://` and `https://` URIs.
///
/// Drives any [`HttpDownloader`] from the registry; ranged execution adds a
/// `Range: bytes=cursor-end` header per block worker.
pub struct HttpHandler {
    scope: Regex,
}

impl Default for HttpHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHandler {
    /// Create the handler with its default scope pattern
    #[allow(clippy::unwrap_used)]
    pub fn new() -> Self {
        Self {
            scope: Regex::new(r"^https?://\S+").unwrap(),
        }
    }

    async fn run(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let effective = engine.effective_config(&task.options).await;
        let downloader = engine.downloaders().create(&effective)?;
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
                self.run_streaming(engine, task, cancel, &effective, downloader, file)
                    .await
            }
        }
    }

    /// Single-block path: one plain request, bytes written sequentially
    /// from offset 0.
    async fn run_streaming(
        &self,
        engine: &EngineHandle,
        task: &Task,
        cancel: &CancellationToken,
        effective: &Config,
        downloader: Arc<dyn HttpDownloader>,
        file: Arc<FileIo>,
    ) -> Result<()> {
        let split = Arc::new(SplitState::single(task.filesize));
        engine.collector().task_add(task.id, Arc::clone(&split));

        let headers = build_headers(effective.headers.as_ref())?;
        let mut response = downloader
            .download(
                &task.uri,
                effective.method.as_deref().unwrap_or("GET"),
                &headers,
                effective.payload.clone().map(Bytes::from),
            )
            .await?;
        if response.status >= 400 {
            response.body.release().await.ok();
            return Err(Error::Transport(format!(
                "HTTP {} for {}",
                response.status, task.uri
            )));
        }

        run_stream(&file, effective, response.body, &split.blocks()[0], cancel).await
    }

    /// Multi-block path: one concurrent worker per unfinished block.
    #[allow(clippy::too_many_arguments)]
    async fn run_ranged(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: &CancellationToken,
        effective: &Config,
        downloader: Arc<dyn HttpDownloader>,
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
                // abort the sibling workers, then keep draining
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

/// Download one block: ranged request, stream, advance cursor, verify.
async fn block_download(
    downloader: Arc<dyn HttpDownloader>,
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

    let mut headers = build_headers(effective.headers.as_ref())?;
    let range = format!("bytes={}-{}", block.cursor(), block.end());
    headers.insert(
        RANGE,
        HeaderValue::from_str(&range)
            .map_err(|_| Error::Transport(format!("invalid range '{range}'")))?,
    );

    let mut response = downloader
        .download(
            &uri,
            effective.method.as_deref().unwrap_or("GET"),
            &headers,
            effective.payload.clone().map(Bytes::from),
        )
        .await?;
    if response.status != 206 {
        // a 200 here would stream the whole file into this block's offset
        response.body.release().await.ok();
        return Err(Error::Transport(format!(
            "server ignored range request (HTTP {})",
            response.status
        )));
    }

    run_stream(&file, &effective, response.body, block, &cancel).await?;
    check_block_complete(block, index)
}

#[async_trait]
impl Handler for HttpHandler {
    fn name(&self) -> &str {
        "http"
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
        let downloader = engine.downloaders().create(&effective)?;
        probe::probe_file_metadata(&*downloader, uri, &effective).await
    }

    async fn handle(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        // placeholder registration, so an early error can still be removed
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
