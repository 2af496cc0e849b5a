//! Default HTTP downloader built on reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::HeaderMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::{RetryPolicy, with_retry};

use super::{ByteStream, HttpDownloader, HttpResponse, build_headers};

/// HTTP downloader backed by a shared [`reqwest::Client`].
///
/// Configured headers become client defaults; per-request headers (notably
/// `Range`) are layered on top. Transient connect failures are retried with
/// exponential backoff before a request is given up on.
pub struct ReqwestDownloader {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl ReqwestDownloader {
    /// Build an adapter from the effective task configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let default_headers = build_headers(config.headers.as_ref())?;
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .build()?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
        })
    }
}

#[async_trait]
impl HttpDownloader for ReqwestDownloader {
    async fn download(
        &self,
        uri: &str,
        method: &str,
        headers: &HeaderMap,
        payload: Option<Bytes>,
    ) -> Result<HttpResponse> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::Transport(format!("invalid HTTP method '{method}'")))?;

        let response = with_retry(&self.retry, || {
            let request = self
                .client
                .request(method.clone(), uri)
                .headers(headers.clone());
            let request = match payload.clone() {
                Some(payload) => request.body(payload),
                None => request,
            };
            async move { request.send().await.map_err(Error::from) }
        })
        .await?;

        Ok(HttpResponse {
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            body: Box::new(ReqwestBodyReader {
                stream: response.bytes_stream().boxed(),
            }),
        })
    }
}

/// Streaming body reader over reqwest's chunk stream.
///
/// Chunk sizes are whatever the transport delivers; the `chunk_size` option
/// governs offset+count transports, not this adapter.
struct ReqwestBodyReader {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
}

#[async_trait]
impl ByteStream for ReqwestBodyReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(Error::Network(e)),
            None => Ok(None),
        }
    }
}
