//! Block bookkeeping for ranged downloads.
//!
//! A [`SplitState`] is one entry per block: the next byte to write (cursor)
//! and the inclusive end of the block, `-1` when the total size is unknown.
//! The handler's block worker is the sole writer of each cursor; the stats
//! sampler reads them with relaxed atomic loads, so a torn read is
//! impossible and no lock is needed on the hot path.
//!
//! The same module owns the checkpoint sidecar format: one `cursor end`
//! pair per line, unfinished blocks only, written to a `.tmp` file and
//! renamed into place so a crash never leaves a torn checkpoint.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

/// A contiguous byte range of the destination file owned by one worker
#[derive(Debug)]
pub struct Block {
    /// Next absolute byte offset this block will write
    cursor: AtomicU64,
    /// Inclusive end of the block, or `-1` when the size is unknown
    end: i64,
}

impl Block {
    /// Create a block with the given cursor and inclusive end
    pub fn new(cursor: u64, end: i64) -> Self {
        Self {
            cursor: AtomicU64::new(cursor),
            end,
        }
    }

    /// Current cursor position
    pub fn cursor(&self) -> u64 {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Inclusive end of the block (`-1` = unknown size)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Advance the cursor past `n` written bytes
    pub fn advance(&self, n: u64) {
        self.cursor.fetch_add(n, Ordering::Relaxed);
    }

    /// Whether bytes remain to be written (`cursor <= end`).
    ///
    /// Unknown-size blocks are always unfinished; only stream exhaustion
    /// ends them.
    pub fn is_unfinished(&self) -> bool {
        self.end < 0 || self.cursor() <= self.end as u64
    }

    /// Bytes left in this block.
    ///
    /// Unknown-size blocks report `i64::MAX - cursor` so the sampler's
    /// remain arithmetic still yields a meaningful delta.
    pub fn remaining(&self) -> u64 {
        let cursor = self.cursor();
        if self.end < 0 {
            (i64::MAX as u64).saturating_sub(cursor)
        } else {
            (self.end as u64 + 1).saturating_sub(cursor)
        }
    }
}

/// The in-memory list of `[cursor, end]` pairs shared between a handler and
/// the stats collector
#[derive(Debug)]
pub struct SplitState {
    blocks: Vec<Block>,
}

impl SplitState {
    /// A single unbounded block `[0, -1]` for streaming downloads of
    /// unknown size (also used as the registration placeholder)
    pub fn streaming() -> Self {
        Self {
            blocks: vec![Block::new(0, -1)],
        }
    }

    /// A single block covering the whole file, unbounded if the size is
    /// unknown or zero
    pub fn single(filesize: Option<u64>) -> Self {
        let end = match filesize {
            Some(n) if n > 0 => (n - 1) as i64,
            _ => -1,
        };
        Self {
            blocks: vec![Block::new(0, end)],
        }
    }

    /// Split `[0, filesize-1]` into `split` blocks.
    ///
    /// The first `split - 1` blocks have length `filesize / split`; the last
    /// block absorbs the remainder. When `filesize < split` the stride is
    /// zero and the whole range degenerates to one block.
    pub fn divide(filesize: u64, split: u32) -> Self {
        debug_assert!(filesize > 0, "divide requires a known non-zero size");
        let n = split.max(1) as u64;
        let step = filesize / n;
        if step == 0 {
            return Self::single(Some(filesize));
        }
        let blocks = (0..n)
            .map(|i| {
                let start = i * step;
                let end = if i == n - 1 {
                    filesize - 1
                } else {
                    (i + 1) * step - 1
                };
                Block::new(start, end as i64)
            })
            .collect();
        Self { blocks }
    }

    /// Rebuild a split from `(cursor, end)` pairs (checkpoint restore)
    pub fn from_pairs(pairs: Vec<(u64, i64)>) -> Self {
        Self {
            blocks: pairs
                .into_iter()
                .map(|(cursor, end)| Block::new(cursor, end))
                .collect(),
        }
    }

    /// The blocks of this split
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the split has no blocks (a checkpoint written at the instant
    /// every block finished)
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Snapshot of the unfinished blocks as `(cursor, end)` pairs
    pub fn unfinished_pairs(&self) -> Vec<(u64, i64)> {
        self.blocks
            .iter()
            .filter(|b| b.is_unfinished())
            .map(|b| (b.cursor(), b.end()))
            .collect()
    }

    /// Total bytes left across all blocks
    pub fn remaining_bytes(&self) -> u64 {
        self.blocks.iter().map(Block::remaining).sum()
    }

    fn encode_unfinished(&self) -> String {
        let mut out = String::new();
        for (cursor, end) in self.unfinished_pairs() {
            out.push_str(&format!("{cursor} {end}\n"));
        }
        out
    }

    fn decode(text: &str) -> std::result::Result<Vec<(u64, i64)>, String> {
        let mut pairs = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(cursor), Some(end), None) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(format!("line {}: expected 'cursor end'", lineno + 1));
            };
            let cursor: u64 = cursor
                .parse()
                .map_err(|e| format!("line {}: bad cursor: {e}", lineno + 1))?;
            let end: i64 = end
                .parse()
                .map_err(|e| format!("line {}: bad end: {e}", lineno + 1))?;
            if end < -1 {
                return Err(format!("line {}: end {end} out of range", lineno + 1));
            }
            if end >= 0 && cursor > end as u64 + 1 {
                return Err(format!(
                    "line {}: cursor {cursor} past end {end}",
                    lineno + 1
                ));
            }
            pairs.push((cursor, end));
        }
        Ok(pairs)
    }

    /// Write the unfinished blocks to the checkpoint sidecar at `path`,
    /// atomically (write `.tmp`, then rename over the target).
    pub fn write_checkpoint(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
            None => "tmp".to_string(),
        });
        std::fs::write(&tmp, self.encode_unfinished())?;
        std::fs::rename(&tmp, path)
    }

    /// Load a checkpoint sidecar.
    ///
    /// Returns `Ok(None)` if the file does not exist and
    /// [`Error::CheckpointCorrupt`] if it cannot be decoded; the caller
    /// falls back to a fresh split in both the missing and corrupt cases.
    pub fn load_checkpoint(path: &Path) -> Result<Option<SplitState>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(&text) {
            Ok(pairs) => Ok(Some(Self::from_pairs(pairs))),
            Err(reason) => Err(Error::CheckpointCorrupt {
                path: path.to_path_buf(),
                reason,
            }),
        }
    }
}
