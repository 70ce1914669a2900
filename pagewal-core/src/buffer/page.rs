//! Page-aligned buffered writer

use super::observer::{TracingObserver, WriteEvent, WriteObserver};
use crate::sink::write_exact;
use crate::{Result, WalError};
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use thiserror::Error;

/// A `write` that stopped early because the sink failed
///
/// `consumed` bytes of the input were taken (buffered or handed to the
/// sink). When `resumable` is set the sink holds exactly those bytes and a
/// retry with the input starting at `consumed` loses nothing. Otherwise a
/// flush failed, the bytes it carried are gone and the sink position is
/// unknown.
#[derive(Error, Debug)]
#[error("write failed after consuming {consumed} bytes: {error}")]
pub struct PartialWrite {
    pub consumed: usize,
    pub resumable: bool,
    #[source]
    pub error: WalError,
}

/// Buffers writes and flushes them to the sink on page boundaries
///
/// Writes below the watermark stay in memory. Once the watermark would be
/// crossed the current page is filled out, everything buffered is flushed,
/// whole pages of the remaining input go straight to the sink and the tail
/// is buffered again. Every flush after the first therefore starts at a
/// sink offset that is a multiple of `page_size`.
///
/// The page offset is tracked in memory only; `initial_page_offset` must
/// match the sink's real position modulo `page_size`.
pub struct PageBuffer<W: Write> {
    sink: W,
    page_size: usize,
    page_offset: usize,
    buffered: usize,
    watermark: usize,
    // watermark + page_size; never resized
    buf: Box<[u8]>,
    observer: Arc<dyn WriteObserver>,
}

impl<W: Write> PageBuffer<W> {
    /// Create a page buffer over `sink`
    ///
    /// # Panics
    ///
    /// Panics if `page_size` is zero or `watermark` is smaller than one page.
    pub fn new(sink: W, page_size: usize, initial_page_offset: usize, watermark: usize) -> Self {
        assert!(page_size > 0, "page size must be positive");
        assert!(watermark >= page_size, "watermark must hold at least one page");
        debug_assert!(initial_page_offset < page_size);

        Self {
            sink,
            page_size,
            page_offset: initial_page_offset % page_size,
            buffered: 0,
            watermark,
            buf: vec![0u8; watermark + page_size].into_boxed_slice(),
            observer: Arc::new(TracingObserver),
        }
    }

    /// Create a page buffer with the default 128 KiB watermark
    pub fn with_default_watermark(sink: W, page_size: usize, initial_page_offset: usize) -> Self {
        Self::new(
            sink,
            page_size,
            initial_page_offset,
            crate::config::DEFAULT_WATERMARK.max(page_size),
        )
    }

    /// Replace the event observer
    pub fn with_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Write `data`, returning how many bytes were consumed
    ///
    /// On success the whole input is consumed. On failure the error carries
    /// the number of bytes taken before the sink failed.
    pub fn write(&mut self, mut data: &[u8]) -> std::result::Result<usize, PartialWrite> {
        let mut consumed = 0;

        loop {
            if data.len() + self.buffered <= self.watermark {
                self.buffer(data);
                return Ok(consumed + data.len());
            }

            // Fill out the current page before flushing
            let slack = self.page_size - (self.page_offset + self.buffered) % self.page_size;
            if slack != self.page_size {
                let partial = data.len() < slack;
                let n = if partial { data.len() } else { slack };
                self.buffer(&data[..n]);
                consumed += n;
                data = &data[n..];
                if partial {
                    return Ok(consumed);
                }
            }

            self.flush().map_err(|error| PartialWrite {
                consumed,
                resumable: false,
                error,
            })?;

            if data.len() > self.page_size {
                let whole = data.len() / self.page_size * self.page_size;
                match write_exact(&mut self.sink, &data[..whole]) {
                    Ok(n) => {
                        self.observer.on_event(&WriteEvent::Passthrough { bytes: n });
                        consumed += n;
                        data = &data[whole..];
                    }
                    Err(error) => {
                        let resumable = matches!(error, WalError::ShortWrite { .. });
                        if let WalError::ShortWrite { written, .. } = &error {
                            // keep alignment in step with what the sink took
                            self.page_offset = (self.page_offset + *written) % self.page_size;
                            consumed += *written;
                        }
                        return Err(PartialWrite {
                            consumed,
                            resumable,
                            error,
                        });
                    }
                }
            }
        }
    }

    /// Hand every buffered byte to the sink
    ///
    /// The page offset advances and the buffer is cleared even when the sink
    /// fails: after an error the sink position is unknown and the caller
    /// must re-synchronise it (see [`PageBuffer::resync`]).
    pub fn flush(&mut self) -> Result<()> {
        if self.buffered == 0 {
            return Ok(());
        }

        let bytes = self.buffered;
        let result = write_exact(&mut self.sink, &self.buf[..bytes]);
        self.page_offset = (self.page_offset + bytes) % self.page_size;
        self.buffered = 0;

        match result {
            Ok(_) => {
                self.observer.on_event(&WriteEvent::Flushed {
                    bytes,
                    page_offset: self.page_offset,
                });
                Ok(())
            }
            Err(e) => {
                self.observer.on_event(&WriteEvent::FlushFailed {
                    bytes,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Drop buffered bytes and restart alignment at `page_offset`
    ///
    /// Used after the caller re-seeks the sink, e.g. following a failed
    /// flush or a tail reset.
    pub fn resync(&mut self, page_offset: usize) {
        debug_assert!(page_offset < self.page_size);
        self.buffered = 0;
        self.page_offset = page_offset % self.page_size;
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Sink position modulo the page size, excluding buffered bytes
    pub fn page_offset(&self) -> usize {
        self.page_offset
    }

    /// Bytes held in memory and not yet flushed
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    /// The pending bytes themselves
    pub fn buffered(&self) -> &[u8] {
        &self.buf[..self.buffered]
    }

    /// Buffer-flush threshold
    pub fn watermark(&self) -> usize {
        self.watermark
    }

    /// Get a reference to the sink
    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    /// Get a mutable reference to the sink
    ///
    /// Writing to the sink directly desynchronises the page offset.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.sink
    }

    /// Flush and return the sink
    pub fn into_inner(mut self) -> Result<W> {
        self.flush()?;
        Ok(self.sink)
    }

    fn buffer(&mut self, data: &[u8]) {
        let end = self.buffered + data.len();
        self.buf[self.buffered..end].copy_from_slice(data);
        self.buffered = end;
    }
}

impl<W: Write> Write for PageBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match PageBuffer::write(self, buf) {
            Ok(n) => Ok(n),
            // only a short bulk write leaves nothing lost behind `consumed`
            Err(partial) if partial.resumable && partial.consumed > 0 => Ok(partial.consumed),
            Err(partial) => Err(partial.error.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        PageBuffer::flush(self)?;
        self.sink.flush()
    }
}

impl<W: Write + fmt::Debug> fmt::Debug for PageBuffer<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuffer")
            .field("sink", &self.sink)
            .field("page_size", &self.page_size)
            .field("page_offset", &self.page_offset)
            .field("buffered", &self.buffered)
            .field("watermark", &self.watermark)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::observer::testing::RecordingObserver;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// In-memory sink that logs each write call and can misbehave on demand
    #[derive(Default)]
    struct MemSink {
        data: Vec<u8>,
        // (sink offset, len) per accepted write call
        calls: Vec<(usize, usize)>,
        // start offset used by alignment checks
        base: usize,
        // call index -> bytes to accept (short write)
        short_on: Option<(usize, usize)>,
        // call index -> fail outright
        fail_on: Option<usize>,
        attempts: usize,
    }

    impl MemSink {
        fn starting_at(base: usize) -> Self {
            Self { base, ..Default::default() }
        }
    }

    impl Write for MemSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let call = self.attempts;
            self.attempts += 1;
            if self.fail_on == Some(call) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            let n = match self.short_on {
                Some((c, accept)) if c == call => accept.min(buf.len()),
                _ => buf.len(),
            };
            self.calls.push((self.base + self.data.len(), n));
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_buffers_below_watermark() {
        let mut pb = PageBuffer::new(MemSink::default(), 4096, 0, 8192);
        assert_eq!(pb.write(&[1u8; 100]).unwrap(), 100);
        assert_eq!(pb.write(&[2u8; 8092]).unwrap(), 8092);
        assert_eq!(pb.buffered_bytes(), 8192);
        assert!(pb.get_ref().calls.is_empty());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut pb = PageBuffer::new(MemSink::default(), 4096, 0, 8192);
        let first = pattern(5000, 1);
        let second = pattern(5000, 2);

        assert_eq!(pb.write(&first).unwrap(), 5000);
        assert!(pb.get_ref().data.is_empty());

        assert_eq!(pb.write(&second).unwrap(), 5000);
        assert_eq!(pb.get_ref().data.len(), 8192);
        assert_eq!(pb.get_ref().calls, vec![(0, 8192)]);
        assert_eq!(pb.buffered_bytes(), 1808);
        assert_eq!(pb.page_offset(), 0);

        let mut expected = first.clone();
        expected.extend_from_slice(&second);
        assert_eq!(&pb.get_ref().data[..], &expected[..8192]);
        assert_eq!(pb.buffered(), &second[3192..]);
    }

    #[test]
    fn test_partial_page_fill_defers_io() {
        let mut pb = PageBuffer::new(MemSink::default(), 64, 10, 128);
        pb.write(&[0u8; 100]).unwrap();
        pb.write(&[0u8; 20]).unwrap();
        assert_eq!(pb.buffered_bytes(), 120);

        assert_eq!(pb.write(&[1u8; 10]).unwrap(), 10);
        assert_eq!(pb.buffered_bytes(), 130);
        assert!(pb.get_ref().calls.is_empty());

        // 52 more bytes complete the page and trigger the flush
        assert_eq!(pb.write(&[2u8; 60]).unwrap(), 60);
        assert_eq!(pb.get_ref().calls, vec![(10, 182)]);
        assert_eq!(pb.page_offset(), 0);
        assert_eq!(pb.buffered_bytes(), 8);
    }

    #[test]
    fn test_bulk_passthrough() {
        let mut pb = PageBuffer::new(MemSink::default(), 64, 0, 128);
        pb.write(&[7u8; 100]).unwrap();
        let big = pattern(1000, 3);
        assert_eq!(pb.write(&big).unwrap(), 1000);

        // flush of 128, then 15 whole pages direct, 12 bytes left buffered
        assert_eq!(pb.get_ref().calls, vec![(0, 128), (128, 960)]);
        assert_eq!(pb.buffered_bytes(), 12);
        assert_eq!(pb.buffered(), &big[988..]);
    }

    #[test]
    fn test_flush_on_empty_is_noop() {
        let mut pb = PageBuffer::new(MemSink::default(), 4096, 17, 8192);
        pb.flush().unwrap();
        pb.flush().unwrap();
        assert!(pb.get_ref().calls.is_empty());
        assert_eq!(pb.page_offset(), 17);
    }

    #[test]
    fn test_flush_advances_page_offset() {
        let mut pb = PageBuffer::new(MemSink::default(), 4096, 4000, 8192);
        pb.write(&[0u8; 200]).unwrap();
        pb.flush().unwrap();
        assert_eq!(pb.page_offset(), 104);
        assert_eq!(pb.buffered_bytes(), 0);
    }

    #[test]
    fn test_failed_flush_keeps_intended_bookkeeping() {
        let sink = MemSink { fail_on: Some(0), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        pb.write(&[0u8; 70]).unwrap();

        let err = pb.flush().unwrap_err();
        assert!(matches!(err, WalError::Io(_)));
        assert_eq!(pb.buffered_bytes(), 0);
        assert_eq!(pb.page_offset(), 6);

        pb.resync(0);
        assert_eq!(pb.page_offset(), 0);
    }

    #[test]
    fn test_flush_failure_reports_consumed() {
        let sink = MemSink { fail_on: Some(0), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        pb.write(&[0u8; 100]).unwrap();

        let err = pb.write(&[1u8; 200]).unwrap_err();
        assert_eq!(err.consumed, 28);
        assert!(!err.resumable);
        assert!(matches!(err.error, WalError::Io(_)));
    }

    #[test]
    fn test_short_bulk_write_resumes_without_loss() {
        // call 0 is the flush, call 1 the passthrough which only takes 100
        let sink = MemSink { short_on: Some((1, 100)), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        let head = pattern(100, 5);
        let body = pattern(1000, 6);

        pb.write(&head).unwrap();
        let err = pb.write(&body).unwrap_err();
        assert!(matches!(err.error, WalError::ShortWrite { written: 100, expected: 960 }));
        assert_eq!(err.consumed, 128);
        assert!(err.resumable);

        let rest = &body[err.consumed..];
        assert_eq!(pb.write(rest).unwrap(), rest.len());
        pb.flush().unwrap();

        let mut expected = head;
        expected.extend_from_slice(&body);
        assert_eq!(pb.get_ref().data, expected);
        // the resumed flush realigned onto a page boundary
        let (offset, len) = pb.get_ref().calls[2];
        assert_eq!((offset + len) % 64, 0);
    }

    #[test]
    fn test_io_write_all_retries_partial_progress() {
        let sink = MemSink { short_on: Some((0, 10)), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        let data = pattern(5000, 9);

        pb.write_all(&data).unwrap();
        Write::flush(&mut pb).unwrap();
        assert_eq!(pb.get_ref().data, data);
    }

    #[test]
    fn test_io_write_all_surfaces_failed_flush() {
        // the sink rejects the flush once, then would accept everything
        let sink = MemSink { fail_on: Some(0), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        pb.write(&[1u8; 100]).unwrap();

        let err = pb.write_all(&[2u8; 200]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(pb.get_ref().data.is_empty());
        assert_eq!(pb.buffered_bytes(), 0);
    }

    #[test]
    fn test_io_write_all_surfaces_short_flush() {
        let sink = MemSink { short_on: Some((0, 10)), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        pb.write(&[1u8; 100]).unwrap();

        let err = pb.write_all(&[2u8; 200]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
        // only the 10 bytes the sink took, nothing claimed beyond them
        assert_eq!(pb.get_ref().data.len(), 10);
        assert_eq!(pb.get_ref().calls.len(), 1);
    }

    #[test]
    fn test_io_flush_surfaces_sink_failure() {
        let sink = MemSink { fail_on: Some(0), ..Default::default() };
        let mut pb = PageBuffer::new(sink, 64, 0, 128);
        pb.write_all(&[3u8; 50]).unwrap();

        assert!(Write::flush(&mut pb).is_err());
        assert!(pb.get_ref().data.is_empty());
    }

    #[test]
    fn test_random_writes_stay_aligned_and_lossless() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let page_size = [16usize, 64, 100, 512, 4096][rng.gen_range(0..5)];
            // any watermark of at least one page, not only whole multiples
            let watermark = rng.gen_range(page_size..page_size * 6);
            let initial = rng.gen_range(0..page_size);
            let mut pb = PageBuffer::new(MemSink::starting_at(initial), page_size, initial, watermark);

            let mut expected = Vec::new();
            for _ in 0..50 {
                let len = rng.gen_range(0..page_size * 3);
                let chunk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let mut rest = &chunk[..];
                while !rest.is_empty() {
                    let n = pb.write(rest).unwrap();
                    rest = &rest[n..];
                }
                expected.extend_from_slice(&chunk);
                assert!(pb.page_offset() < page_size);
            }
            pb.flush().unwrap();

            let sink = pb.into_inner().unwrap();
            assert_eq!(sink.data, expected);
            for &(offset, _) in sink.calls.iter().skip(1) {
                assert_eq!(offset % page_size, 0, "unaligned write at {offset}");
            }
        }
    }

    #[test]
    fn test_observer_sees_flush_and_passthrough() {
        let observer = Arc::new(RecordingObserver::default());
        let mut pb = PageBuffer::new(MemSink::default(), 64, 0, 128)
            .with_observer(observer.clone());
        pb.write(&[0u8; 100]).unwrap();
        pb.write(&[0u8; 200]).unwrap();

        assert_eq!(
            observer.events(),
            vec![
                WriteEvent::Flushed { bytes: 128, page_offset: 0 },
                WriteEvent::Passthrough { bytes: 128 },
            ]
        );
    }

    #[test]
    fn test_default_watermark() {
        let pb = PageBuffer::with_default_watermark(Vec::<u8>::new(), 4096, 0);
        assert_eq!(pb.watermark(), 128 * 1024);
    }

    #[test]
    #[should_panic(expected = "page size must be positive")]
    fn test_zero_page_size_panics() {
        let _ = PageBuffer::new(Vec::<u8>::new(), 0, 0, 128);
    }
}
