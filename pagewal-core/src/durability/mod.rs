//! Durability and space-reservation primitives
//!
//! Each target platform gets one `Durability` implementation, exposed as
//! [`PlatformDurability`]. Every implementation treats an unsupported
//! reservation call as success: callers cannot tell "reserved" from
//! "not supported but harmless".
//!
//! Sinks that are not backed by an OS file (see [`SegmentSink::as_file`])
//! get the portable behavior: syncs flush the sink, fixed reservation is a
//! no-op and extending reservation grows the logical length.

mod portable;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod darwin;

pub use portable::PortableDurability;

#[cfg(target_os = "linux")]
pub use linux::LinuxDurability;

#[cfg(target_os = "macos")]
pub use darwin::DarwinDurability;

use crate::sink::SegmentSink;
use crate::Result;
use std::io::{self, SeekFrom};

/// Durability implementation for the build target
#[cfg(target_os = "linux")]
pub type PlatformDurability = LinuxDurability;

/// Durability implementation for the build target
#[cfg(target_os = "macos")]
pub type PlatformDurability = DarwinDurability;

/// Durability implementation for the build target
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub type PlatformDurability = PortableDurability;

/// Flush-to-stable-storage and space-reservation primitives
///
/// All calls block. None of them is issued by `PageBuffer`; when to sync is
/// the caller's policy.
pub trait Durability {
    /// Flush data and metadata to stable storage
    fn sync_full<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()>;

    /// Flush data, skipping metadata where the platform allows it
    fn sync_data<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()>;

    /// Reserve `size` bytes from the start of the sink without changing its
    /// logical length. Succeeds without doing anything when unsupported.
    fn preallocate_fixed<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()>;

    /// Reserve `size` bytes from the start of the sink, growing its logical
    /// length to at least `size`. Never shrinks the sink.
    fn preallocate_extend<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()>;

    /// Reserve `size` bytes, extending the logical length when `extend`
    fn preallocate<S: SegmentSink + ?Sized>(
        &self,
        sink: &mut S,
        size: u64,
        extend: bool,
    ) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        if extend {
            self.preallocate_extend(sink, size)
        } else {
            self.preallocate_fixed(sink, size)
        }
    }
}

/// Sync data and metadata using the platform implementation
pub fn sync_full<S: SegmentSink + ?Sized>(sink: &mut S) -> Result<()> {
    PlatformDurability::default().sync_full(sink)
}

/// Sync data only using the platform implementation
pub fn sync_data<S: SegmentSink + ?Sized>(sink: &mut S) -> Result<()> {
    PlatformDurability::default().sync_data(sink)
}

/// Reserve space using the platform implementation
pub fn preallocate<S: SegmentSink + ?Sized>(sink: &mut S, size: u64, extend: bool) -> Result<()> {
    PlatformDurability::default().preallocate(sink, size, extend)
}

/// Grow the logical length to `size` through seek and truncate
///
/// Portable fallback for platforms or filesystems without an extending
/// reservation call. The added range is zero-filled by the filesystem but
/// not guaranteed to be physically contiguous. The cursor is left where it
/// was.
pub(crate) fn extend_by_truncate<S: SegmentSink + ?Sized>(sink: &mut S, size: u64) -> io::Result<()> {
    let cursor = sink.seek(SeekFrom::Current(0))?;
    let len = sink.seek(SeekFrom::End(0))?;
    sink.seek(SeekFrom::Start(cursor))?;

    if len >= size {
        return Ok(());
    }
    sink.set_len(size)
}

#[cfg_attr(not(any(target_os = "linux", target_os = "macos")), allow(dead_code))]
pub(crate) fn checked_off_t(value: u64) -> io::Result<i64> {
    i64::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "reservation size overflows off_t"))
}
