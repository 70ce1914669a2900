//! Filesystem helpers for log directories

use crate::durability;
use crate::{Result, WalError};
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Owner read/write
pub const FILE_MODE: u32 = 0o600;

/// Owner read/write/search
pub const DIR_MODE: u32 = 0o700;

/// Check that files can be created and removed in `dir`
pub fn is_dir_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(".touch");
    write_with_mode(&probe, b"", FILE_MODE)?;
    fs::remove_file(&probe)?;
    Ok(())
}

/// File names in `dir`, sorted
pub fn read_dir_sorted(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Create `dir` and its parents if missing, then check it is writable
pub fn touch_dir_all(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(dir)?;
    is_dir_writable(dir)
}

/// Like [`touch_dir_all`], but fails if `dir` already has entries
pub fn create_dir_all_empty(dir: &Path) -> Result<()> {
    touch_dir_all(dir)?;
    let entries = read_dir_sorted(dir)?;
    if !entries.is_empty() {
        return Err(WalError::DirNotEmpty {
            dir: dir.display().to_string(),
            entries,
        });
    }
    Ok(())
}

/// Whether anything exists at `path`
pub fn exists(path: &Path) -> bool {
    path.try_exists().unwrap_or(false)
}

/// Write `data` to `path`, sync it, then close
///
/// Creates or truncates the file. A short write is reported as
/// `ShortWrite`; the file is synced only if the write succeeded.
pub fn write_and_sync_file(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = open_truncated(path, mode)?;

    let written = file.write(data)?;
    if written < data.len() {
        return Err(WalError::ShortWrite {
            written,
            expected: data.len(),
        });
    }
    durability::sync_full(&mut file)
}

fn write_with_mode(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let mut file = open_truncated(path, mode)?;
    file.write_all(data)?;
    Ok(())
}

fn open_truncated(path: &Path, mode: u32) -> io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    options.open(path)
}

/// Caps every read at `limit` bytes
///
/// Bounds how much a single read pulls from the inner reader.
#[derive(Debug)]
pub struct LimitedReader<R> {
    inner: R,
    limit: usize,
}

impl<R: Read> LimitedReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self { inner, limit }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.limit);
        self.inner.read(&mut buf[..n])
    }
}
