//! Linux durability: fdatasync and fallocate

use super::{checked_off_t, extend_by_truncate, Durability};
use crate::sink::SegmentSink;
use crate::Result;
use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

/// fallocate-backed reservation, fdatasync-backed data sync
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxDurability;

impl Durability for LinuxDurability {
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
            fdatasync(file)?;
        }
        Ok(())
    }

    fn preallocate_fixed<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()> {
        let Some(file) = sink.as_file() else {
            return Ok(());
        };
        match fallocate(file, libc::FALLOC_FL_KEEP_SIZE, size) {
            Err(e) if is_unsupported(&e) => Ok(()),
            other => other.map_err(Into::into),
        }
    }

    fn preallocate_extend<S: SegmentSink + ?Sized>(&self, sink: &mut S, size: u64) -> Result<()> {
        let result = match sink.as_file() {
            Some(file) => fallocate(file, 0, size),
            None => Err(io::Error::from_raw_os_error(libc::EOPNOTSUPP)),
        };
        match result {
            Err(e) if is_unsupported(&e) => Ok(extend_by_truncate(sink, size)?),
            other => other.map_err(Into::into),
        }
    }
}

fn fdatasync(file: &File) -> io::Result<()> {
    let res = unsafe { libc::fdatasync(file.as_raw_fd()) };
    if res == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::ENOSYS || code == libc::EINVAL => file.sync_all(),
        _ => Err(err),
    }
}

fn fallocate(file: &File, mode: libc::c_int, size: u64) -> io::Result<()> {
    let len = checked_off_t(size)?;
    let res = unsafe { libc::fallocate(file.as_raw_fd(), mode, 0, len) };
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// The filesystem or kernel cannot reserve space this way
fn is_unsupported(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(code) if code == libc::EOPNOTSUPP
            || code == libc::ENOSYS
            || code == libc::EINTR
            || code == libc::EINVAL
    )
}
