//! pagewal core - page-aligned write buffering for append-only logs
//!
//! Sits between a log writer issuing arbitrarily sized appends and the
//! segment file underneath it:
//!
//! - **PageBuffer**: coalesces small writes into page-aligned flushes and
//!   passes whole pages of large writes straight through
//! - **Durability**: fsync/fdatasync and space preallocation, one
//!   implementation per platform, unsupported reservation is a no-op
//! - **Segment tail reset**: truncate at the cursor, then re-reserve the
//!   dropped range so the segment keeps its size
//! - **Segments**: framed records over the pieces above, with rotation,
//!   sync policies and crash recovery
//!
//! # Concurrency
//!
//! Nothing here synchronizes internally except [`segment::SharedSegmentWriter`].
//! A `PageBuffer` or `SegmentWriter` belongs to exactly one writer.

pub mod buffer;
pub mod durability;
pub mod fsutil;
pub mod segment;
pub mod sink;

mod error;

pub use buffer::{PageBuffer, PartialWrite, WriteEvent, WriteObserver};
pub use durability::{Durability, PlatformDurability};
pub use error::{Result, WalError};
pub use segment::{reset_tail, SegmentConfig, SegmentReader, SegmentWriter, SyncPolicy};
pub use sink::SegmentSink;

/// pagewal version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Filesystem page size used for alignment (4KB)
    pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

    /// Buffered bytes held before a flush (128KB)
    pub const DEFAULT_WATERMARK: usize = 128 * 1024;

    /// Bytes preallocated per WAL segment (64MB)
    pub const WAL_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;
}
