//! Engine-level tests: lifecycle control, URI intake, crash recovery, and
//! end-to-end downloads over scripted transports.

mod add;
mod download;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, TaskOptions};
use crate::core::{CoreProcess, EngineHandle};
use crate::db::Task;
use crate::downloader::{ByteStream, HttpDownloader, HttpResponse};
use crate::error::{Error, Result};
use crate::handler::Handler;
use crate::split::SplitState;
use crate::types::{FileMetadata, TaskId};

/// Build an engine on a scratch directory. The tempdir must be kept alive
/// for the duration of the test.
pub(crate) async fn create_test_core() -> (CoreProcess, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        database: format!("sqlite://{}", dir.path().join("test.db").display()),
        dir: dir.path().join("download"),
        update_interval: 0.05,
        ..Default::default()
    };
    let core = CoreProcess::new(config).await.unwrap();
    (core, dir)
}

/// How a [`StubHandler`] behaves once spawned
#[derive(Clone, Copy)]
pub(crate) enum StubMode {
    /// Return immediately with success
    Complete,
    /// Park until cancelled, then propagate the cancellation
    Hang,
}

/// A recording handler with fixed metadata, for lifecycle tests that don't
/// care about bytes.
pub(crate) struct StubHandler {
    pub(crate) prefix: &'static str,
    pub(crate) metadata: FileMetadata,
    pub(crate) mode: StubMode,
    /// `(task_id, resume)` per `handle` invocation
    pub(crate) calls: Arc<std::sync::Mutex<Vec<(TaskId, bool)>>>,
}

impl StubHandler {
    pub(crate) fn new(prefix: &'static str, filename: &str, mode: StubMode) -> Arc<Self> {
        Arc::new(Self {
            prefix,
            metadata: FileMetadata {
                filesize: Some(100),
                filename: filename.to_string(),
                support_range: true,
            },
            mode,
            calls: Arc::new(std::sync::Mutex::new(Vec::new())),
        })
    }

    pub(crate) fn calls(&self) -> Vec<(TaskId, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Handler for StubHandler {
    fn name(&self) -> &str {
        "stub"
    }

    fn check_scope(&self, uri: &str) -> bool {
        uri.starts_with(self.prefix)
    }

    async fn file_metadata(
        &self,
        _engine: &EngineHandle,
        _uri: &str,
        _options: &TaskOptions,
    ) -> Result<FileMetadata> {
        Ok(self.metadata.clone())
    }

    async fn handle(
        &self,
        engine: &EngineHandle,
        task: &Task,
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.calls.lock().unwrap().push((task.id, resume));
        engine
            .collector()
            .task_add(task.id, Arc::new(SplitState::streaming()));
        match self.mode {
            StubMode::Complete => Ok(()),
            StubMode::Hang => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
        }
    }
}

/// Where a scripted transport should inject a failure
#[derive(Clone, Copy)]
pub(crate) struct FailAt {
    /// The `Range` start of the block to sabotage
    pub(crate) range_start: u64,
    /// Chunks delivered before the stream errors
    pub(crate) after_chunks: usize,
}

/// A fully scripted HTTP transport.
///
/// Understands the metadata probe (`Range: bytes=0-0` GET, then HEAD) and
/// ranged block requests, so the real `HttpHandler` can run against it
/// deterministically: exact chunk sizes, optional per-chunk delay, and
/// optional mid-stream failure injection.
pub(crate) struct ScriptedDownloader {
    pub(crate) body: Vec<u8>,
    /// Report the size during probing (Content-Range / Content-Length)
    pub(crate) advertise_size: bool,
    /// Advertise `Accept-Ranges: bytes`
    pub(crate) advertise_range: bool,
    /// Chunk sizes cycle through this list (last one repeats)
    pub(crate) chunk_sizes: Vec<usize>,
    /// Sleep between chunks, to leave room for pause mid-stream
    pub(crate) delay: Duration,
    pub(crate) fail_at: Option<FailAt>,
    /// Number of non-probe data requests served
    pub(crate) data_requests: AtomicUsize,
}

impl ScriptedDownloader {
    pub(crate) fn sized(body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            body,
            advertise_size: true,
            advertise_range: true,
            chunk_sizes: vec![64],
            delay: Duration::ZERO,
            fail_at: None,
            data_requests: AtomicUsize::new(0),
        })
    }

    fn parse_range(headers: &HeaderMap) -> Option<(u64, u64)> {
        let value = headers.get(reqwest::header::RANGE)?.to_str().ok()?;
        let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    }

    fn response_headers(&self, range: Option<(u64, u64)>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if self.advertise_range {
            headers.insert(
                reqwest::header::ACCEPT_RANGES,
                HeaderValue::from_static("bytes"),
            );
        }
        if self.advertise_size {
            if let Some((start, end)) = range {
                headers.insert(
                    reqwest::header::CONTENT_RANGE,
                    HeaderValue::from_str(&format!(
                        "bytes {start}-{end}/{}",
                        self.body.len()
                    ))
                    .unwrap(),
                );
            }
            headers.insert(
                reqwest::header::CONTENT_LENGTH,
                HeaderValue::from_str(&self.body.len().to_string()).unwrap(),
            );
        }
        headers
    }

    fn chunked(&self, slice: &[u8]) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        let mut cursor = 0;
        let mut sizes = self.chunk_sizes.iter();
        let mut size = *sizes.next().unwrap_or(&64);
        while cursor < slice.len() {
            let take = size.min(slice.len() - cursor);
            chunks.push(Bytes::copy_from_slice(&slice[cursor..cursor + take]));
            cursor += take;
            if let Some(next) = sizes.next() {
                size = *next;
            }
        }
        chunks
    }
}

#[async_trait]
impl HttpDownloader for ScriptedDownloader {
    async fn download(
        &self,
        _uri: &str,
        method: &str,
        headers: &HeaderMap,
        _payload: Option<Bytes>,
    ) -> Result<HttpResponse> {
        let range = Self::parse_range(headers);

        if method.eq_ignore_ascii_case("HEAD") {
            return Ok(HttpResponse {
                status: 200,
                headers: self.response_headers(None),
                body: Box::new(ScriptedStream::empty()),
            });
        }

        // the metadata probe: one byte, full size in Content-Range
        if range == Some((0, 0)) && self.advertise_size && self.advertise_range {
            return Ok(HttpResponse {
                status: 206,
                headers: self.response_headers(Some((0, 0))),
                body: Box::new(ScriptedStream::empty()),
            });
        }

        self.data_requests.fetch_add(1, Ordering::SeqCst);

        match range {
            Some((start, end)) if self.advertise_range => {
                let slice = &self.body[start as usize..=(end as usize).min(self.body.len() - 1)];
                let fail_after = self
                    .fail_at
                    .filter(|f| f.range_start == start)
                    .map(|f| f.after_chunks);
                Ok(HttpResponse {
                    status: 206,
                    headers: self.response_headers(Some((start, end))),
                    body: Box::new(ScriptedStream {
                        chunks: self.chunked(slice),
                        delay: self.delay,
                        fail_after,
                        delivered: 0,
                    }),
                })
            }
            _ => Ok(HttpResponse {
                status: 200,
                headers: self.response_headers(None),
                body: Box::new(ScriptedStream {
                    chunks: self.chunked(&self.body),
                    delay: self.delay,
                    fail_after: self.fail_at.map(|f| f.after_chunks),
                    delivered: 0,
                }),
            }),
        }
    }
}

pub(crate) struct ScriptedStream {
    chunks: Vec<Bytes>,
    delay: Duration,
    fail_after: Option<usize>,
    delivered: usize,
}

impl ScriptedStream {
    fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            delay: Duration::ZERO,
            fail_after: None,
            delivered: 0,
        }
    }
}

#[async_trait]
impl ByteStream for ScriptedStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if let Some(fail_after) = self.fail_after
            && self.delivered >= fail_after
        {
            return Err(Error::Transport("scripted mid-stream failure".into()));
        }
        if self.chunks.is_empty() {
            return Ok(None);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.delivered += 1;
        Ok(Some(self.chunks.remove(0)))
    }
}

/// Register a scripted transport under `"scripted"` and return the options
/// selecting it.
pub(crate) fn use_scripted(core: &CoreProcess, downloader: Arc<ScriptedDownloader>) -> TaskOptions {
    core.register_downloader("scripted", move |_config| {
        Ok(Arc::clone(&downloader) as Arc<dyn HttpDownloader>)
    });
    TaskOptions {
        downloader: Some("scripted".to_string()),
        ..Default::default()
    }
}

/// Poll until `probe` returns true or the timeout elapses
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if probe().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
