//! Write-path events delivered to a caller-supplied observer

use tracing::{debug, trace, warn};

/// Something the write path did that a caller may want to record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    /// Buffered bytes were handed to the sink
    Flushed { bytes: usize, page_offset: usize },
    /// Whole pages were written directly, bypassing the buffer
    Passthrough { bytes: usize },
    /// A flush reached the sink and failed
    FlushFailed { bytes: usize, error: String },
    /// The sink was synced to stable storage
    Synced { data_only: bool },
    /// Space was reserved for the sink
    Preallocated { size: u64, extend: bool },
    /// A segment tail was truncated and re-reserved
    TailReset { offset: u64, length: u64 },
    /// A new segment file was started
    Rotated { segment_id: u64 },
}

/// Receives write-path events
pub trait WriteObserver: Send + Sync {
    fn on_event(&self, event: &WriteEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl WriteObserver for NoopObserver {
    fn on_event(&self, _event: &WriteEvent) {}
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WriteObserver for TracingObserver {
    fn on_event(&self, event: &WriteEvent) {
        match event {
            WriteEvent::Flushed { bytes, page_offset } => {
                trace!(bytes, page_offset, "page buffer flushed");
            }
            WriteEvent::Passthrough { bytes } => {
                trace!(bytes, "bulk passthrough write");
            }
            WriteEvent::FlushFailed { bytes, error } => {
                warn!(bytes, %error, "page buffer flush failed, sink position unknown");
            }
            WriteEvent::Synced { data_only } => {
                debug!(data_only, "sink synced");
            }
            WriteEvent::Preallocated { size, extend } => {
                debug!(size, extend, "space preallocated");
            }
            WriteEvent::TailReset { offset, length } => {
                debug!(offset, length, "segment tail reset");
            }
            WriteEvent::Rotated { segment_id } => {
                debug!(segment_id, "segment rotated");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Records every event for assertions
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<WriteEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<WriteEvent> {
            self.events.lock().clone()
        }
    }

    impl WriteObserver for RecordingObserver {
        fn on_event(&self, event: &WriteEvent) {
            self.events.lock().push(event.clone());
        }
    }
}
