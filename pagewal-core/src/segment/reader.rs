//! Segment reader for recovery

use super::record::{self, Decoded};
use super::{list_segments, SegmentConfig};
use crate::{Result, WalError};
use bytes::Bytes;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// Records recovered from one segment
#[derive(Debug, Clone, Default)]
pub struct SegmentScan {
    /// Verified record payloads, in append order
    pub records: Vec<Bytes>,
    /// Offset just past the last verified record
    pub valid_end: u64,
    /// Whether unreadable bytes were found after `valid_end`
    pub torn: bool,
}

/// Scan a segment file up to the end of its valid data
///
/// Stops at the zero fill, at a record cut short by a crash, or at a
/// checksum mismatch. Only I/O failures are errors.
pub fn scan_segment(path: &Path) -> Result<SegmentScan> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let mut scan = SegmentScan::default();
    let mut offset = 0usize;

    while offset < data.len() {
        match record::decode(&data[offset..]) {
            Ok(Decoded::Record { payload, len }) => {
                scan.records.push(Bytes::copy_from_slice(payload));
                offset += len;
            }
            Ok(Decoded::End) => break,
            Ok(Decoded::Torn) => {
                warn!(offset, path = %path.display(), "incomplete record at segment tail");
                scan.torn = true;
                break;
            }
            Err(WalError::ChecksumMismatch { expected, actual }) => {
                warn!(
                    offset,
                    expected,
                    actual,
                    path = %path.display(),
                    "checksum mismatch, truncating segment"
                );
                scan.torn = true;
                break;
            }
            Err(e) => return Err(e),
        }
    }

    scan.valid_end = offset as u64;
    Ok(scan)
}

/// Reads records back from every segment in a directory
pub struct SegmentReader {
    config: SegmentConfig,
}

impl SegmentReader {
    /// Create a new segment reader
    pub fn new(config: SegmentConfig) -> Self {
        Self { config }
    }

    /// Recover all records from all segments
    pub fn recover(&self) -> Result<Vec<Bytes>> {
        self.recover_from(0)
    }

    /// Recover records from a specific segment onwards
    pub fn recover_from(&self, start_segment: u64) -> Result<Vec<Bytes>> {
        let mut records = Vec::new();

        for (id, path) in list_segments(&self.config.dir)? {
            if id < start_segment {
                continue;
            }
            let scan = scan_segment(&path)?;
            info!(
                segment = id,
                records = scan.records.len(),
                torn = scan.torn,
                "recovered segment"
            );
            records.extend(scan.records);
        }

        Ok(records)
    }
}
