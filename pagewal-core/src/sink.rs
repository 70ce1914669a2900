//! Sink abstraction for segment files
//!
//! `PageBuffer` only needs `std::io::Write`. Tail operations additionally
//! need to seek and to change the logical length, which `SegmentSink` adds.

use crate::{Result, WalError};
use std::fs::File;
use std::io::{self, Cursor, ErrorKind, Seek, Write};

/// A sequential byte sink that can also seek and truncate
pub trait SegmentSink: Write + Seek {
    /// Set the logical length, zero-filling when growing
    fn set_len(&mut self, len: u64) -> io::Result<()>;

    /// The OS file backing this sink, if any
    ///
    /// Durability providers use it for platform syscalls. Sinks without a
    /// file fall back to portable behavior.
    fn as_file(&self) -> Option<&File> {
        None
    }
}

impl SegmentSink for File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(self, len)
    }

    fn as_file(&self) -> Option<&File> {
        Some(self)
    }
}

impl SegmentSink for &File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        File::set_len(*self, len)
    }

    fn as_file(&self) -> Option<&File> {
        Some(*self)
    }
}

impl<S: SegmentSink + ?Sized> SegmentSink for &mut S {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        (**self).set_len(len)
    }

    fn as_file(&self) -> Option<&File> {
        (**self).as_file()
    }
}

impl SegmentSink for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "length exceeds address space"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// Issue a single write of `buf`, surfacing a short count as an error
///
/// Only `Interrupted` is retried. Returns the number of bytes the sink
/// accepted; on `ShortWrite` that count is in the error.
pub(crate) fn write_exact<W: Write + ?Sized>(sink: &mut W, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    let written = loop {
        match sink.write(buf) {
            Ok(n) => break n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(WalError::Io(e)),
        }
    };
    if written < buf.len() {
        return Err(WalError::ShortWrite {
            written,
            expected: buf.len(),
        });
    }
    Ok(written)
}
