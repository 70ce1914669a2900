//! Segment tail reset

use crate::durability::Durability;
use crate::sink::SegmentSink;
use crate::Result;
use std::io::SeekFrom;

/// Where a tail reset cut the segment and how long it is afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailReset {
    /// Cursor position, now the end of meaningful data
    pub offset: u64,
    /// Logical length, restored to its pre-reset value
    pub length: u64,
}

/// Discard everything after the cursor while keeping the reserved length
///
/// Truncates the sink at its current cursor, then re-reserves up to the
/// previous logical length so the discarded range reads back as the
/// filesystem's zero fill. The cursor is restored. Used to drop a torn or
/// abandoned tail without giving back the segment's preallocated space.
pub fn reset_tail<S, D>(sink: &mut S, durability: &D) -> Result<TailReset>
where
    S: SegmentSink + ?Sized,
    D: Durability,
{
    let offset = sink.seek(SeekFrom::Current(0))?;
    let length = sink.seek(SeekFrom::End(0))?;

    sink.set_len(offset)?;
    durability.preallocate(sink, length, true)?;

    sink.seek(SeekFrom::Start(offset))?;
    Ok(TailReset {
        offset,
        length: length.max(offset),
    })
}
