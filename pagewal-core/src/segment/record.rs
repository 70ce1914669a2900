//! Record framing
//!
//! Format:
//! - 4 bytes: payload length (little endian, never zero)
//! - 4 bytes: CRC32 of the payload
//! - N bytes: payload
//!
//! Segments are preallocated with zeros, so a zero length word marks the
//! end of data.

use crate::{Result, WalError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length + checksum header
pub const RECORD_HEADER_SIZE: usize = 8;

/// Frame `payload` for appending to a segment
pub fn encode(payload: &[u8]) -> Result<Bytes> {
    if payload.is_empty() {
        return Err(WalError::InvalidFormat("Empty record payload".into()));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| WalError::InvalidFormat(format!("Record too large: {} bytes", payload.len())))?;

    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE + payload.len());
    buf.put_u32_le(len);
    buf.put_u32_le(crc32fast::hash(payload));
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Result of decoding at one position
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// A complete, verified record and the bytes it occupied
    Record { payload: &'a [u8], len: usize },
    /// Zero fill or end of input: no more records
    End,
    /// Record cut short by the end of input
    Torn,
}

/// Decode the record at the start of `data`
///
/// Fails only on a checksum mismatch.
pub fn decode(data: &[u8]) -> Result<Decoded<'_>> {
    if data.len() < RECORD_HEADER_SIZE {
        return Ok(if data.iter().all(|&b| b == 0) {
            Decoded::End
        } else {
            Decoded::Torn
        });
    }

    let mut header = &data[..RECORD_HEADER_SIZE];
    let len = header.get_u32_le() as usize;
    let expected = header.get_u32_le();
    if len == 0 {
        return Ok(Decoded::End);
    }

    let Some(payload) = data.get(RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + len) else {
        return Ok(Decoded::Torn);
    };

    let actual = crc32fast::hash(payload);
    if expected != actual {
        return Err(WalError::ChecksumMismatch { expected, actual });
    }

    Ok(Decoded::Record {
        payload,
        len: RECORD_HEADER_SIZE + len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let framed = encode(b"hello wal").unwrap();
        assert_eq!(framed.len(), RECORD_HEADER_SIZE + 9);
        assert_eq!(&framed[..4], &9u32.to_le_bytes());

        let decoded = decode(&framed).unwrap();
        assert_eq!(
            decoded,
            Decoded::Record { payload: b"hello wal", len: framed.len() }
        );
    }

    #[test]
    fn test_zero_fill_is_end() {
        assert_eq!(decode(&[0u8; 64]).unwrap(), Decoded::End);
        assert_eq!(decode(&[0u8; 3]).unwrap(), Decoded::End);
        assert_eq!(decode(&[]).unwrap(), Decoded::End);
    }

    #[test]
    fn test_truncated_record_is_torn() {
        let framed = encode(b"abcdefgh").unwrap();
        assert_eq!(decode(&framed[..10]).unwrap(), Decoded::Torn);
        assert_eq!(decode(&framed[..5]).unwrap(), Decoded::Torn);
    }

    #[test]
    fn test_checksum_validation() {
        let mut framed = encode(b"payload").unwrap().to_vec();
        framed[RECORD_HEADER_SIZE + 2] ^= 0xFF;
        assert!(matches!(decode(&framed), Err(WalError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(encode(b""), Err(WalError::InvalidFormat(_))));
    }
}
