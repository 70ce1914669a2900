//! Error types for pagewal

use thiserror::Error;

/// Result type alias for pagewal operations
pub type Result<T> = std::result::Result<T, WalError>;

/// pagewal error types
#[derive(Error, Debug)]
pub enum WalError {
    /// Sink write, seek or truncate failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Sink accepted fewer bytes than requested
    #[error("Short write: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Invalid data format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Offset outside the written part of a segment
    #[error("Invalid offset {offset}: segment data ends at {end}")]
    InvalidOffset { offset: u64, end: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An earlier write or sync failed; the writer must be reopened
    #[error("Writer poisoned by an earlier failure, reopen to recover")]
    Poisoned,

    /// Directory expected to be empty was not
    #[error("Directory not empty: {dir} contains {entries:?}")]
    DirNotEmpty { dir: String, entries: Vec<String> },
}

impl WalError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::Io(_) | WalError::ShortWrite { .. })
    }

    /// Check if error indicates corruption
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalError::ChecksumMismatch { .. })
    }
}

impl From<WalError> for std::io::Error {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io(e) => e,
            WalError::ShortWrite { .. } => {
                std::io::Error::new(std::io::ErrorKind::WriteZero, err.to_string())
            }
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}
