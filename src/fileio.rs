//! Positional file IO.
//!
//! Three interchangeable backends implement `pwrite(data, offset)`:
//!
//! - [`FileIoMode::MmapIo`] — a writable memory map over the pre-allocated
//!   file, flushing the written range
//! - [`FileIoMode::SysIo`] — the platform's positional write (`pwrite` on
//!   Unix, overlapped `WriteFile` on Windows, both via `std::os::*::fs::FileExt`)
//! - [`FileIoMode::GeneralIo`] — save position, seek, write, restore; a
//!   mutex serializes concurrent use on the shared handle
//!
//! Writes can be offloaded to the blocking thread pool with
//! [`pwrite_async`] so large copies never stall the scheduler.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

/// File IO backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileIoMode {
    /// Memory-mapped writes
    #[default]
    MmapIo,
    /// Positional syscall writes
    SysIo,
    /// Seek + write fallback
    GeneralIo,
}

enum Backend {
    Mmap { map: Mutex<MmapMut> },
    Sys { file: File },
    General { file: Mutex<File> },
}

/// An open destination file wrapped in one of the positional-write backends
pub struct FileIo {
    backend: Backend,
}

impl FileIo {
    /// Open (creating if missing) the destination at `path` with the given
    /// backend.
    ///
    /// The mmap backend needs a non-zero file length to map; a zero-length
    /// destination (unknown-size stream, not yet pre-allocated) falls back
    /// to the positional-syscall backend, which can grow the file.
    pub fn open(path: &Path, mode: FileIoMode) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let backend = match mode {
            FileIoMode::MmapIo => {
                if file.metadata()?.len() == 0 {
                    tracing::debug!(path = %path.display(), "empty file, mmapio falls back to sysio");
                    Backend::Sys { file }
                } else {
                    let map = unsafe { MmapMut::map_mut(&file)? };
                    Backend::Mmap {
                        map: Mutex::new(map),
                    }
                }
            }
            FileIoMode::SysIo => Backend::Sys { file },
            FileIoMode::GeneralIo => Backend::General {
                file: Mutex::new(file),
            },
        };
        Ok(Self { backend })
    }

    /// Write `data` at the absolute `offset`, returning the byte count
    /// written.
    pub fn pwrite(&self, data: &[u8], offset: u64) -> std::io::Result<usize> {
        match &self.backend {
            Backend::Mmap { map } => {
                let mut map = map.lock().unwrap_or_else(PoisonError::into_inner);
                let offset = offset as usize;
                let Some(end) = offset.checked_add(data.len()).filter(|e| *e <= map.len()) else {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!(
                            "write of {} bytes at {offset} past mapped length {}",
                            data.len(),
                            map.len()
                        ),
                    ));
                };
                map[offset..end].copy_from_slice(data);
                map.flush_range(offset, data.len())?;
                Ok(data.len())
            }
            Backend::Sys { file } => {
                write_at(file, data, offset)?;
                Ok(data.len())
            }
            Backend::General { file } => {
                let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
                let saved = file.stream_position()?;
                file.seek(SeekFrom::Start(offset))?;
                let wrote = file.write_all(data);
                let restored = file.seek(SeekFrom::Start(saved));
                wrote?;
                restored?;
                Ok(data.len())
            }
        }
    }
}

#[cfg(unix)]
fn write_at(file: &File, data: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_at(file: &File, mut data: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "positional write returned zero",
            ));
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

/// Perform the positional write on the blocking thread pool.
///
/// Used when `fileio_async` is enabled so a slow disk never blocks the
/// cooperative scheduler. Takes owned [`Bytes`] because the write outlives
/// the caller's borrow.
pub async fn pwrite_async(io: Arc<FileIo>, data: Bytes, offset: u64) -> std::io::Result<usize> {
    tokio::task::spawn_blocking(move || io.pwrite(&data, offset))
        .await
        .map_err(std::io::Error::other)?
}

/// Create the destination and size it to `length`.
///
/// With `exist_ok`, a pre-existing file is left untouched apart from its
/// modification time; without it, creation is exclusive and a pre-existing
/// file is an error.
pub fn pre_alloc_file(path: &Path, length: u64, exist_ok: bool) -> std::io::Result<()> {
    if exist_ok
        && let Ok(file) = OpenOptions::new().write(true).open(path)
    {
        file.set_modified(std::time::SystemTime::now())?;
        return Ok(());
    }
    let mut opts = OpenOptions::new();
    opts.write(true).create(true);
    if !exist_ok {
        opts.create_new(true);
    }
    let file = opts.open(path)?;
    file.set_len(length)?;
    Ok(())
}
