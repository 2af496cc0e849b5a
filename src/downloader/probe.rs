//! HTTP file metadata probing.
//!
//! Negotiates `(size, name, range_supported)` before a task row exists:
//! a `GET` with `Range: bytes=0-0` first (a 206 carries the total size in
//! `Content-Range` and costs one byte), falling back to `HEAD` and
//! `Content-Length`. Range support is advertised through
//! `Accept-Ranges: bytes`, matched case-insensitively.

use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue};

use crate::config::Config;
use crate::error::Result;
use crate::types::FileMetadata;

use super::{HttpDownloader, build_headers};

#[allow(clippy::unwrap_used)]
static CONTENT_RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bytes\s+[^/]+/([0-9]+)").unwrap());

/// Extract a filename from `Content-Disposition` or the URI path.
///
/// The last path segment is percent-decoded; an unusable result (empty
/// path, trailing slash) falls back to `"download"`.
pub fn guess_filename(uri: &str, headers: &HeaderMap) -> String {
    if let Some(disposition) = headers
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        && let Some(name) = filename_from_disposition(disposition)
    {
        return name;
    }

    let segment = url::Url::parse(uri)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .unwrap_or_default();
    let decoded = urlencoding::decode(&segment)
        .map(|s| s.into_owned())
        .unwrap_or(segment);
    if decoded.is_empty() {
        "download".to_string()
    } else {
        decoded
    }
}

fn filename_from_disposition(disposition: &str) -> Option<String> {
    for part in disposition.split(';') {
        let part = part.trim();
        if let Some(value) = part
            .strip_prefix("filename=")
            .or_else(|| part.strip_prefix("FILENAME="))
        {
            let name = value.trim().trim_matches(&['"', '\''][..]).to_string();
            if !name.is_empty() {
                return Some(name);
            }
        }
    }
    None
}

/// Whether the response advertises byte-range support
pub fn guess_support_range(headers: &HeaderMap) -> bool {
    headers
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Probe size, filename, and range support for `uri`.
pub async fn probe_file_metadata(
    downloader: &dyn HttpDownloader,
    uri: &str,
    config: &Config,
) -> Result<FileMetadata> {
    let method = config.method.as_deref().unwrap_or("GET");
    let mut probe_headers = build_headers(config.headers.as_ref())?;
    probe_headers.insert(
        reqwest::header::RANGE,
        HeaderValue::from_static("bytes=0-0"),
    );

    let mut response = downloader
        .download(uri, method, &probe_headers, None)
        .await?;
    response.body.release().await.ok();

    if response.status == 206
        && let Some(total) = response
            .headers
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| CONTENT_RANGE_RE.captures(v))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
    {
        return Ok(FileMetadata {
            filesize: Some(total),
            filename: named(uri, &response.headers, config),
            support_range: guess_support_range(&response.headers),
        });
    }

    let mut response = downloader.download(uri, "HEAD", &probe_headers, None).await?;
    response.body.release().await.ok();

    Ok(FileMetadata {
        filesize: content_length(&response.headers),
        filename: named(uri, &response.headers, config),
        support_range: guess_support_range(&response.headers),
    })
}

fn named(uri: &str, headers: &HeaderMap, config: &Config) -> String {
    config
        .out
        .clone()
        .unwrap_or_else(|| guess_filename(uri, headers))
}
