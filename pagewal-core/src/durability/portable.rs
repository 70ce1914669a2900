//! Standard-library durability for platforms without dedicated syscalls

use super::{extend_by_truncate, Durability};
use crate::sink::SegmentSink;
use crate::Result;

/// Durability built only on `std::fs::File`
///
/// Fixed reservation is a no-op and extending reservation falls back to
/// truncate. Also usable on any platform to opt out of syscalls.
#[derive(Debug, Default, Clone, Copy)]
pub struct PortableDurability;

impl Durability for PortableDurability {
    fn sync_full<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.flush()?;
        if let Some(file) = sink.as_file() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn sync_data<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.flush()?;
        if let Some(file) = sink.as_file() {
            file.sync_data()?;
        }
        Ok(())
    }

    fn preallocate_fixed<S: SegmentSink + ?Sized>(&self, _sink: &mut S, _size: u64) -> Result<()> {
        Ok(())
    }

    fn preallocate_extend<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()> {
        extend_by_truncate(sink, size)?;
        Ok(())
    }
}
