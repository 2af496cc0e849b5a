//! Per-protocol downloader contracts and the factory registry.
//!
//! A downloader turns a URI into a finite lazy sequence of byte chunks.
//! Two shapes exist:
//! - [`HttpDownloader`] — request/response transports addressed with a
//!   `Range` header (the default [`http::ReqwestDownloader`] implements it)
//! - [`RangedDownloader`] — offset + count transports (FTP/SFTP-shaped);
//!   concrete wire clients are supplied by the embedding application
//!
//! HTTP downloaders are constructed through [`DownloaderRegistry`], a table
//! of factories keyed by a short name carried in configuration, so tasks
//! can select an implementation without any dynamic loading.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::FileMetadata;

pub mod http;
pub mod probe;

pub use http::ReqwestDownloader;

/// A finite lazy sequence of byte chunks with a release hook
#[async_trait]
pub trait ByteStream: Send {
    /// The next chunk, or `None` once the stream is exhausted
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Release transport resources held by the stream.
    ///
    /// Called on every exit path, including cancellation; dropping without
    /// release must still be safe.
    async fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An HTTP response handed back to the handler
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Streaming response body
    pub body: Box<dyn ByteStream>,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Request/response transport addressed with a `Range` header
#[async_trait]
pub trait HttpDownloader: Send + Sync {
    /// Perform a request and return the status, headers, and body stream.
    ///
    /// Adapters retry transient connect-level failures internally; an `Err`
    /// means the retry budget is exhausted.
    async fn download(
        &self,
        uri: &str,
        method: &str,
        headers: &HeaderMap,
        payload: Option<Bytes>,
    ) -> Result<HttpResponse>;
}

impl std::fmt::Debug for dyn HttpDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn HttpDownloader").finish_non_exhaustive()
    }
}

/// Offset + count transport (FTP/SFTP-shaped).
///
/// `metadata`'s `support_range` is what the transport reports — for FTP
/// that is typically a `REST 0` probe, which is indicative rather than
/// definitive; the engine trusts it when deciding whether to split.
#[async_trait]
pub trait RangedDownloader: Send + Sync {
    /// Negotiate size, name, and range support for the URI
    async fn metadata(&self, uri: &str) -> Result<FileMetadata>;

    /// Open a stream of `count` bytes starting at `offset`.
    ///
    /// `None` streams to the end of the file.
    async fn open(&self, uri: &str, offset: u64, count: Option<u64>) -> Result<Box<dyn ByteStream>>;
}

/// Factory producing an HTTP downloader from an effective configuration
pub type HttpDownloaderFactory =
    Arc<dyn Fn(&Config) -> Result<Arc<dyn HttpDownloader>> + Send + Sync>;

/// Table of HTTP downloader factories keyed by short name.
///
/// `"reqwest"` is registered out of the box; tests and embedders can
/// register their own and select them per task via the `downloader` option.
pub struct DownloaderRegistry {
    factories: RwLock<HashMap<String, HttpDownloaderFactory>>,
}

impl Default for DownloaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloaderRegistry {
    /// A registry with the built-in `"reqwest"` factory
    pub fn new() -> Self {
        let registry = Self {
            factories: RwLock::new(HashMap::new()),
        };
        registry.register("reqwest", |config| {
            Ok(Arc::new(ReqwestDownloader::from_config(config)?) as Arc<dyn HttpDownloader>)
        });
        registry
    }

    /// Register (or replace) a factory under `name`
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Config) -> Result<Arc<dyn HttpDownloader>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(factory));
    }

    /// Instantiate the downloader named by `config.downloader`
    pub fn create(&self, config: &Config) -> Result<Arc<dyn HttpDownloader>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.downloader)
            .cloned()
            .ok_or_else(|| Error::UnknownDownloader(config.downloader.clone()))?;
        factory(config)
    }
}

/// Build a [`HeaderMap`] from configured string pairs
pub(crate) fn build_headers(pairs: Option<&HashMap<String, String>>) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(pairs) = pairs {
        for (name, value) in pairs {
            let name: reqwest::header::HeaderName = name.parse().map_err(|_| Error::Config {
                message: format!("invalid header name '{name}'"),
                key: Some("headers".to_string()),
            })?;
            let value: reqwest::header::HeaderValue =
                value.parse().map_err(|_| Error::Config {
                    message: format!("invalid header value for '{name}'"),
                    key: Some("headers".to_string()),
                })?;
            headers.insert(name, value);
        }
    }
    Ok(headers)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_knows_the_builtin_reqwest_factory() {
        let registry = DownloaderRegistry::new();
        let config = Config::default();
        assert!(registry.create(&config).is_ok());
    }

    #[test]
    fn registry_rejects_unknown_names() {
        let registry = DownloaderRegistry::new();
        let config = Config {
            downloader: "curl".to_string(),
            ..Default::default()
        };
        let err = registry.create(&config).unwrap_err();
        assert!(matches!(err, Error::UnknownDownloader(name) if name == "curl"));
    }

    #[test]
    fn registered_factories_replace_and_resolve() {
        let registry = DownloaderRegistry::new();
        registry.register("reqwest", |config| {
            // replacement factory still builds the stock adapter
            Ok(Arc::new(ReqwestDownloader::from_config(config)?) as Arc<dyn HttpDownloader>)
        });
        assert!(registry.create(&Config::default()).is_ok());
    }

    #[test]
    fn build_headers_accepts_valid_pairs_and_rejects_bad_names() {
        let mut pairs = HashMap::new();
        pairs.insert("User-Agent".to_string(), "getex".to_string());
        let headers = build_headers(Some(&pairs)).unwrap();
        assert_eq!(headers.get("user-agent").unwrap(), "getex");

        let mut bad = HashMap::new();
        bad.insert("no spaces allowed".to_string(), "x".to_string());
        assert!(build_headers(Some(&bad)).is_err());

        assert!(build_headers(None).unwrap().is_empty());
    }
}
