//! Append-only log segments
//!
//! A segment is a preallocated file written through a `PageBuffer`. Records
//! are length + CRC framed; the zero fill left by preallocation marks the
//! end of data, and a torn tail found on reopen is cut off with
//! [`reset_tail`] so the segment keeps its reserved size.

pub mod record;
mod reader;
mod tail;
mod writer;

pub use reader::{scan_segment, SegmentReader, SegmentScan};
pub use tail::{reset_tail, TailReset};
pub use writer::{Position, SegmentWriter, SharedSegmentWriter};

use crate::{fsutil, Result, WalError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// When appends are synced to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Sync after every append (safest, slowest)
    Immediate,
    /// Sync after N appends
    EveryN(usize),
    /// Sync once the interval has elapsed since the last sync
    Interval { millis: u64 },
    /// Never sync implicitly; the caller decides
    None,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy::Immediate
    }
}

/// Segment configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Directory holding segment files
    pub dir: PathBuf,
    /// Sync policy
    pub sync_policy: SyncPolicy,
    /// Bytes preallocated per segment; appends rotate past it
    pub segment_size: u64,
    /// Alignment unit for flushes
    pub page_size: usize,
    /// Buffered bytes held before flushing
    pub watermark: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            sync_policy: SyncPolicy::default(),
            segment_size: crate::config::WAL_SEGMENT_SIZE,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            watermark: crate::config::DEFAULT_WATERMARK,
        }
    }
}

impl SegmentConfig {
    /// Check the sizes are usable
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(WalError::Config("page_size must be positive".into()));
        }
        if self.watermark < self.page_size {
            return Err(WalError::Config(format!(
                "watermark {} is smaller than page_size {}",
                self.watermark, self.page_size
            )));
        }
        if self.segment_size == 0 {
            return Err(WalError::Config("segment_size must be positive".into()));
        }
        Ok(())
    }
}

/// Path of segment `id` inside `dir`
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("wal_{:020}.log", id))
}

/// Segment id encoded in a segment file name
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|s| s.strip_prefix("wal_"))
        .and_then(|s| s.strip_suffix(".log"))
        .and_then(|s| s.parse().ok())
}

/// Segments in `dir`, ordered by id
pub fn list_segments(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    if !fsutil::exists(dir) {
        return Ok(Vec::new());
    }
    // zero-padded names sort in id order
    let segments = fsutil::read_dir_sorted(dir)?
        .into_iter()
        .map(|name| dir.join(name))
        .filter_map(|path| parse_segment_id(&path).map(|id| (id, path)))
        .collect();
    Ok(segments)
}
