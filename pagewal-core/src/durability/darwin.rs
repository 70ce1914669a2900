//! macOS durability: F_FULLFSYNC and F_PREALLOCATE

use super::{checked_off_t, extend_by_truncate, Durability};
use crate::sink::SegmentSink;
use crate::Result;
use std::fs::File;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;

/// F_PREALLOCATE-backed reservation, F_FULLFSYNC-backed syncs
///
/// A plain fsync on HFS+/APFS only reaches the drive cache, so both sync
/// strengths issue F_FULLFSYNC.
#[derive(Debug, Default, Clone, Copy)]
pub struct DarwinDurability;

impl Durability for DarwinDurability {
    fn sync_full<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        sink.flush()?;
        if let Some(file) = sink.as_file() {
            full_fsync(file)?;
        }
        Ok(())
    }

    fn sync_data<S: SegmentSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        self.sync_full(sink)
    }

    fn preallocate_fixed<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()> {
        match sink.as_file() {
            Some(file) => Ok(preallocate_all(file, size)?),
            None => Ok(()),
        }
    }

    fn preallocate_extend<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()> {
        self.preallocate_fixed(sink, size)?;
        extend_by_truncate(sink, size)?;
        Ok(())
    }
}

fn full_fsync(file: &File) -> io::Result<()> {
    let res = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC, 0) };
    if res == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::ENOTSUP || code == libc::EINVAL => file.sync_all(),
        _ => Err(err),
    }
}

fn preallocate_all(file: &File, size: u64) -> io::Result<()> {
    let mut store = libc::fstore_t {
        fst_flags: libc::F_ALLOCATEALL,
        fst_posmode: libc::F_PEOFPOSMODE,
        fst_offset: 0,
        fst_length: checked_off_t(size)?,
        fst_bytesalloc: 0,
    };
    let res = unsafe {
        libc::fcntl(
            file.as_raw_fd(),
            libc::F_PREALLOCATE,
            &mut store as *mut libc::fstore_t,
        )
    };
    if res != -1 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::ENOTSUP => Ok(()),
        // EINVAL when the request is already covered by allocated blocks
        Some(code) if code == libc::EINVAL => {
            let allocated = file.metadata()?.blocks() * 512;
            if allocated >= size {
                Ok(())
            } else {
                Err(err)
            }
        }
        _ => Err(err),
    }
}
