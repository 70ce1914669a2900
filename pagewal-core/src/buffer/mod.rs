//! Page-aligned write buffering
//!
//! `PageBuffer` coalesces small appends into page-sized flushes so that a
//! log segment sees few, aligned writes. It is not synchronized; wrap it in
//! a lock (see `segment::SharedSegmentWriter`) for concurrent appenders.

mod observer;
mod page;

pub use observer::{NoopObserver, TracingObserver, WriteEvent, WriteObserver};
pub use page::{PageBuffer, PartialWrite};

#[cfg(test)]
pub(crate) use observer::testing;
