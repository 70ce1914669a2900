//! Segment writer implementation

use super::record;
use super::{
    list_segments, reset_tail, scan_segment, segment_path, SegmentConfig, SyncPolicy, TailReset,
};
use crate::buffer::{PageBuffer, TracingObserver, WriteEvent, WriteObserver};
use crate::durability::{Durability, PlatformDurability};
use crate::{fsutil, Result, WalError};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Location of a record: segment id and byte offset within the segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub segment_id: u64,
    pub offset: u64,
}

/// Appends framed records to preallocated segment files
///
/// Single writer: every method takes `&mut self`. Use
/// [`SharedSegmentWriter`] when several threads append.
///
/// Buffered records are flushed (not synced) on drop.
///
/// A failed write, flush or sync poisons the writer: the segment may hold
/// part of a record the writer no longer accounts for, so every later call
/// returns [`WalError::Poisoned`] and nothing more is flushed. Reopening
/// drops the torn tail.
pub struct SegmentWriter<D: Durability = PlatformDurability> {
    config: SegmentConfig,
    durability: D,
    buffer: PageBuffer<File>,
    observer: Arc<dyn WriteObserver>,
    segment_id: u64,
    // end of appended data in the current segment, buffered bytes included
    offset: u64,
    writes_since_sync: usize,
    last_sync: Instant,
    poisoned: bool,
}

impl SegmentWriter {
    /// Open the latest segment in `config.dir`, or create the first one
    pub fn open(config: SegmentConfig) -> Result<Self> {
        Self::open_with(config, PlatformDurability::default(), Arc::new(TracingObserver))
    }
}

impl<D: Durability> SegmentWriter<D> {
    /// Open with an explicit durability provider and observer
    ///
    /// An existing segment is scanned, its torn tail (if any) is dropped
    /// with [`reset_tail`] and appends resume right after the last valid
    /// record.
    pub fn open_with(
        config: SegmentConfig,
        durability: D,
        observer: Arc<dyn WriteObserver>,
    ) -> Result<Self> {
        config.validate()?;
        fsutil::touch_dir_all(&config.dir)?;

        let (segment_id, file, offset) = match list_segments(&config.dir)?.pop() {
            Some((id, path)) => {
                let scan = scan_segment(&path)?;
                let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
                file.seek(SeekFrom::Start(scan.valid_end))?;

                let reset = reset_tail(&mut file, &durability)?;
                observer.on_event(&WriteEvent::TailReset {
                    offset: reset.offset,
                    length: reset.length,
                });
                info!(
                    segment = id,
                    records = scan.records.len(),
                    offset = scan.valid_end,
                    torn = scan.torn,
                    "resuming segment"
                );
                (id, file, scan.valid_end)
            }
            None => {
                let file = Self::create_segment(&config, &durability, observer.as_ref(), 0)?;
                (0, file, 0)
            }
        };

        let page_offset = (offset % config.page_size as u64) as usize;
        let buffer = PageBuffer::new(file, config.page_size, page_offset, config.watermark)
            .with_observer(observer.clone());

        Ok(Self {
            config,
            durability,
            buffer,
            observer,
            segment_id,
            offset,
            writes_since_sync: 0,
            last_sync: Instant::now(),
            poisoned: false,
        })
    }

    /// Append a record, returning where it starts
    ///
    /// Rotates to a new segment first when the record would run past
    /// `segment_size`. A record that cannot fit in an empty segment is
    /// rejected. If the sink fails mid-append the writer is poisoned.
    pub fn append(&mut self, payload: &[u8]) -> Result<Position> {
        self.check_poisoned()?;
        let framed = record::encode(payload)?;
        if framed.len() as u64 > self.config.segment_size {
            return Err(WalError::InvalidFormat(format!(
                "record of {} bytes exceeds segment size {}",
                framed.len(),
                self.config.segment_size
            )));
        }

        if self.offset > 0 && self.offset + framed.len() as u64 > self.config.segment_size {
            let rotated = self.rotate();
            self.poison_on_err(rotated)?;
        }

        let mut rest = &framed[..];
        while !rest.is_empty() {
            match self.buffer.write(rest) {
                Ok(n) => rest = &rest[n..],
                Err(partial) => {
                    warn!(
                        segment = self.segment_id,
                        offset = self.offset,
                        consumed = partial.consumed,
                        error = %partial.error,
                        "append failed, writer poisoned"
                    );
                    self.poisoned = true;
                    return Err(partial.error);
                }
            }
        }

        let position = Position {
            segment_id: self.segment_id,
            offset: self.offset,
        };
        self.offset += framed.len() as u64;
        self.writes_since_sync += 1;

        if self.should_sync() {
            self.sync()?;
        }

        Ok(position)
    }

    /// Hand buffered records to the segment file without syncing
    pub fn flush(&mut self) -> Result<()> {
        self.check_poisoned()?;
        let flushed = self.buffer.flush();
        self.poison_on_err(flushed)
    }

    /// Flush and sync record data to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.check_poisoned()?;
        let synced = self
            .buffer
            .flush()
            .and_then(|()| self.durability.sync_data(self.buffer.get_mut()));
        self.poison_on_err(synced)?;
        self.observer.on_event(&WriteEvent::Synced { data_only: true });
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Discard every record at or after `offset` in the current segment
    ///
    /// `offset` should be a record boundary, e.g. a [`Position`] returned
    /// by `append`. The segment keeps its preallocated length.
    pub fn rewind(&mut self, offset: u64) -> Result<()> {
        self.check_poisoned()?;
        if offset > self.offset {
            return Err(WalError::InvalidOffset {
                offset,
                end: self.offset,
            });
        }

        let reset = self.reset_to(offset);
        let reset = self.poison_on_err(reset)?;

        self.buffer
            .resync((offset % self.config.page_size as u64) as usize);
        self.offset = offset;
        self.observer.on_event(&WriteEvent::TailReset {
            offset: reset.offset,
            length: reset.length,
        });
        debug!(segment = self.segment_id, offset, "segment rewound");
        Ok(())
    }

    /// Flush, then sync data and metadata
    pub fn close(mut self) -> Result<()> {
        self.check_poisoned()?;
        // nothing left for drop to flush, even if the sync fails
        self.poisoned = true;
        self.buffer.flush()?;
        self.durability.sync_full(self.buffer.get_mut())?;
        self.observer.on_event(&WriteEvent::Synced { data_only: false });
        Ok(())
    }

    /// Get current segment ID
    pub fn current_segment(&self) -> u64 {
        self.segment_id
    }

    /// Where the next record will be appended
    pub fn position(&self) -> Position {
        Position {
            segment_id: self.segment_id,
            offset: self.offset,
        }
    }

    /// Remove segments older than `segment_id` (used after a checkpoint)
    ///
    /// The segment being written is never removed.
    pub fn truncate_before(&self, segment_id: u64) -> Result<usize> {
        let limit = segment_id.min(self.segment_id);
        let mut truncated = 0;
        for (id, path) in list_segments(&self.config.dir)? {
            if id < limit {
                fs::remove_file(&path)?;
                truncated += 1;
            }
        }
        Ok(truncated)
    }

    /// Whether an earlier failure left the writer unusable
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(WalError::Poisoned);
        }
        Ok(())
    }

    fn poison_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!(segment = self.segment_id, error = %e, "writer poisoned");
            self.poisoned = true;
        }
        result
    }

    fn reset_to(&mut self, offset: u64) -> Result<TailReset> {
        self.buffer.flush()?;
        let file = self.buffer.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        reset_tail(file, &self.durability)
    }

    fn should_sync(&self) -> bool {
        match self.config.sync_policy {
            SyncPolicy::Immediate => true,
            SyncPolicy::EveryN(n) => self.writes_since_sync >= n,
            SyncPolicy::Interval { millis } => {
                self.last_sync.elapsed().as_millis() >= millis as u128
            }
            SyncPolicy::None => false,
        }
    }

    fn rotate(&mut self) -> Result<()> {
        // Seal current segment
        self.buffer.flush()?;
        self.durability.sync_full(self.buffer.get_mut())?;

        let next = self.segment_id + 1;
        let file = Self::create_segment(&self.config, &self.durability, self.observer.as_ref(), next)?;
        self.buffer = PageBuffer::new(file, self.config.page_size, 0, self.config.watermark)
            .with_observer(self.observer.clone());
        self.segment_id = next;
        self.offset = 0;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();

        self.observer.on_event(&WriteEvent::Rotated { segment_id: next });
        Ok(())
    }

    fn create_segment(
        config: &SegmentConfig,
        durability: &D,
        observer: &dyn WriteObserver,
        segment_id: u64,
    ) -> Result<File> {
        let path = segment_path(&config.dir, segment_id);
        let mut options = OpenOptions::new();
        options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(fsutil::FILE_MODE);
        }
        let mut file = options.open(&path)?;

        durability.preallocate(&mut file, config.segment_size, true)?;
        observer.on_event(&WriteEvent::Preallocated {
            size: config.segment_size,
            extend: true,
        });
        info!(segment = segment_id, path = %path.display(), "created segment");
        Ok(file)
    }
}

impl<D: Durability> Drop for SegmentWriter<D> {
    fn drop(&mut self) {
        if self.poisoned {
            return;
        }
        if let Err(e) = self.buffer.flush() {
            warn!(segment = self.segment_id, error = %e, "flush on drop failed");
        }
    }
}

/// A [`SegmentWriter`] behind a mutex, for concurrent appenders
pub struct SharedSegmentWriter<D: Durability = PlatformDurability> {
    inner: Mutex<SegmentWriter<D>>,
}

impl SharedSegmentWriter {
    /// Open the latest segment in `config.dir`, or create the first one
    pub fn open(config: SegmentConfig) -> Result<Self> {
        Ok(Self::new(SegmentWriter::open(config)?))
    }
}

impl<D: Durability> SharedSegmentWriter<D> {
    /// Wrap an existing writer
    pub fn new(writer: SegmentWriter<D>) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Append a record
    pub fn append(&self, payload: &[u8]) -> Result<Position> {
        self.inner.lock().append(payload)
    }

    /// Hand buffered records to the segment file
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    /// Force sync to disk
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().sync()
    }

    /// Discard every record at or after `offset` in the current segment
    pub fn rewind(&self, offset: u64) -> Result<()> {
        self.inner.lock().rewind(offset)
    }

    /// Where the next record will be appended
    pub fn position(&self) -> Position {
        self.inner.lock().position()
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> SegmentWriter<D> {
        self.inner.into_inner()
    }
}
