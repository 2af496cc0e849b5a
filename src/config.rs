//! Configuration types for getex
//!
//! [`Config`] is the global configuration; [`TaskOptions`] is the per-task
//! overlay persisted with each task row. [`Config::overlay`] derives the
//! effective configuration a handler runs with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::fileio::FileIoMode;

/// Main configuration for the download engine
///
/// Every field has a sensible default, so `Config::default()` works out of
/// the box. Most fields can be overridden per task through [`TaskOptions`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Enable store statement echo (default: false)
    #[serde(default)]
    pub debug: bool,

    /// UTC offset in hours applied to task timestamps (default: 0)
    #[serde(default)]
    pub timezone_offset: i32,

    /// File IO backend selection (default: mmapio)
    #[serde(default)]
    pub fileio: FileIoMode,

    /// Perform each positional write on a blocking worker thread (default: false)
    #[serde(default)]
    pub fileio_async: bool,

    /// Store URL (default: "sqlite://getex.db")
    #[serde(default = "default_database")]
    pub database: String,

    /// Checkpoint sidecar suffix appended to the destination path (default: ".getex")
    #[serde(default = "default_tempfile_suffix")]
    pub tempfile_suffix: String,

    /// Speed sampler period in seconds (default: 5.0)
    #[serde(default = "default_update_interval")]
    pub update_interval: f64,

    /// Default block count for ranged downloads (default: 16)
    #[serde(default = "default_split")]
    pub split: u32,

    /// Stream read size in bytes for ranged transports (default: 64 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Default download directory (default: "./download")
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Override for the destination filename (default: None, use the
    /// server-reported name)
    #[serde(default)]
    pub out: Option<String>,

    /// Registry name of the default HTTP downloader (default: "reqwest")
    #[serde(default = "default_downloader")]
    pub downloader: String,

    /// HTTP request method override (default: GET)
    #[serde(default)]
    pub method: Option<String>,

    /// Extra HTTP request headers
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,

    /// HTTP request payload
    #[serde(default)]
    pub payload: Option<String>,
}

fn default_database() -> String {
    "sqlite://getex.db".to_string()
}

fn default_tempfile_suffix() -> String {
    ".getex".to_string()
}

fn default_update_interval() -> f64 {
    5.0
}

fn default_split() -> u32 {
    16
}

fn default_chunk_size() -> usize {
    64 * 1024 * 1024
}

fn default_dir() -> PathBuf {
    PathBuf::from("./download")
}

fn default_downloader() -> String {
    "reqwest".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            timezone_offset: 0,
            fileio: FileIoMode::default(),
            fileio_async: false,
            database: default_database(),
            tempfile_suffix: default_tempfile_suffix(),
            update_interval: default_update_interval(),
            split: default_split(),
            chunk_size: default_chunk_size(),
            dir: default_dir(),
            out: None,
            downloader: default_downloader(),
            method: None,
            headers: None,
            payload: None,
        }
    }
}

impl Config {
    /// The current time in the configured timezone.
    ///
    /// `timezone_offset` hours east of UTC; out-of-range offsets fall back
    /// to UTC rather than panicking on a bad configuration.
    pub fn now(&self) -> chrono::DateTime<chrono::FixedOffset> {
        use chrono::Offset;
        let offset = chrono::FixedOffset::east_opt(self.timezone_offset.saturating_mul(3600))
            .unwrap_or_else(|| chrono::Utc.fix());
        chrono::Utc::now().with_timezone(&offset)
    }

    /// Derive the effective per-task configuration by overlaying task options
    /// onto a clone of this configuration.
    pub fn overlay(&self, options: &TaskOptions) -> Config {
        let mut effective = self.clone();
        if let Some(dir) = &options.dir {
            effective.dir = dir.clone();
        }
        if let Some(out) = &options.out {
            effective.out = Some(out.clone());
        }
        if let Some(split) = options.split {
            effective.split = split;
        }
        if let Some(chunk_size) = options.chunk_size {
            effective.chunk_size = chunk_size;
        }
        if let Some(fileio) = options.fileio {
            effective.fileio = fileio;
        }
        if let Some(fileio_async) = options.fileio_async {
            effective.fileio_async = fileio_async;
        }
        if let Some(suffix) = &options.tempfile_suffix {
            effective.tempfile_suffix = suffix.clone();
        }
        if let Some(downloader) = &options.downloader {
            effective.downloader = downloader.clone();
        }
        if let Some(method) = &options.method {
            effective.method = Some(method.clone());
        }
        if let Some(headers) = &options.headers {
            effective.headers = Some(headers.clone());
        }
        if let Some(payload) = &options.payload {
            effective.payload = Some(payload.clone());
        }
        effective
    }

    /// Merge a JSON object of option overrides into this configuration.
    ///
    /// The typed equivalent of assigning attributes one by one: the current
    /// configuration is serialized, the object's top-level keys replace the
    /// matching fields, and the result is deserialized back. Unknown keys
    /// are rejected so typos don't silently vanish.
    pub fn merge_global(&mut self, options: serde_json::Value) -> Result<()> {
        let serde_json::Value::Object(overrides) = options else {
            return Err(Error::Config {
                message: "global options must be a JSON object".to_string(),
                key: None,
            });
        };
        let mut current = match serde_json::to_value(&*self)? {
            serde_json::Value::Object(map) => map,
            _ => unreachable!("Config serializes to an object"),
        };
        for (key, value) in overrides {
            if !current.contains_key(&key) {
                return Err(Error::Config {
                    message: format!("unknown configuration key '{key}'"),
                    key: Some(key),
                });
            }
            current.insert(key, value);
        }
        *self = serde_json::from_value(serde_json::Value::Object(current))?;
        Ok(())
    }
}

/// Per-task option overlay, persisted as JSON in the task row.
///
/// Only set fields override the global configuration. `extra` keeps any
/// additional keys a caller supplies, so options survive round-trips through
/// the store even when this crate doesn't interpret them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOptions {
    /// Destination directory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Destination filename override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<String>,

    /// Block count override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split: Option<u32>,

    /// Stream read size override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    /// File IO backend override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fileio: Option<FileIoMode>,

    /// Blocking-pool write offload override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fileio_async: Option<bool>,

    /// Checkpoint suffix override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempfile_suffix: Option<String>,

    /// Downloader registry name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloader: Option<String>,

    /// HTTP method override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Extra HTTP request headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// HTTP request payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// Uninterpreted keys, kept for round-tripping
    #[serde(flatten, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TaskOptions {
    /// Merge another set of options into this one; set fields in `other` win.
    pub fn merge(&mut self, other: TaskOptions) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field;
                }
            };
        }
        take!(dir);
        take!(out);
        take!(split);
        take!(chunk_size);
        take!(fileio);
        take!(fileio_async);
        take!(tempfile_suffix);
        take!(downloader);
        take!(method);
        take!(headers);
        take!(payload);
        self.extra.extend(other.extra);
    }
}
