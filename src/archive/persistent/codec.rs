//! Frame codec for the event journal.
//!
//! File layout:
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [len: u32 LE][crc32: u32 LE][payload: len bytes of JSON]
//! [len: u32 LE][crc32: u32 LE][payload: len bytes of JSON]
//! ...
//! ```
//! A frame cut short by a crash surfaces as `ErrorKind::UnexpectedEof`;
//! a frame whose checksum does not match surfaces as `ErrorKind::InvalidData`.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Current journal format version.
pub const JOURNAL_VERSION: u8 = 1;

/// Magic bytes identifying a trackgraph journal.
pub const MAGIC: [u8; 4] = *b"TGEJ";

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

/// Size of a frame header (length + checksum) in bytes.
pub const FRAME_OVERHEAD: u64 = 8;

/// Hard upper bound on a single frame's payload.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

fn checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Encodes one value as a frame.
///
/// # Errors
/// Returns `InvalidData` if the value does not serialize or exceeds
/// `max_bytes`.
pub fn encode_frame<T: Serialize>(value: &T, max_bytes: usize) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    if data.len() > max_bytes.min(MAX_FRAME_BYTES) {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds maximum {max_bytes}", data.len()),
        ));
    }
    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidData, "frame length overflows u32"))?;

    let mut out = Vec::with_capacity(data.len() + 8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&checksum(&data).to_le_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Decodes the next frame.
///
/// Returns `Ok(None)` at a clean end of input (no bytes left before the
/// frame header).
///
/// # Errors
/// - `UnexpectedEof` if the input ends inside a frame
/// - `InvalidData` on an oversized length, a checksum mismatch, or JSON
///   that does not decode
pub fn decode_frame<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<Option<T>> {
    let mut header = [0u8; 8];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(IoError::new(ErrorKind::UnexpectedEof, "truncated frame header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if len > MAX_FRAME_BYTES {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_BYTES}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let computed_crc = checksum(&data);
    if stored_crc != computed_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Write the file header.
///
/// # Errors
/// Propagates write errors.
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[JOURNAL_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
///
/// # Errors
/// Returns `InvalidData` on wrong magic bytes or an unsupported version.
pub fn read_header(reader: &mut impl Read) -> IoResult<()> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    if header[..4] != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {:?}", &header[..4]),
        ));
    }
    if header[4] != JOURNAL_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "unsupported journal version: {} (expected {JOURNAL_VERSION})",
                header[4]
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::event::DomainEvent;

    #[test]
    fn test_frame_decodes_event() {
        let event = DomainEvent::item_speed_changed("I1", 3.5);
        let encoded = encode_frame(&event, MAX_FRAME_BYTES).unwrap();

        let mut cursor = Cursor::new(encoded);
        let decoded: Option<DomainEvent> = decode_frame(&mut cursor).unwrap();
        assert_eq!(decoded, Some(event));

        let end: Option<DomainEvent> = decode_frame(&mut cursor).unwrap();
        assert!(end.is_none());
    }

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode_frame(&"test data".to_string(), MAX_FRAME_BYTES).unwrap();
        encoded[10] ^= 0xFF;

        let err = decode_frame::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_truncated_frame_is_unexpected_eof() {
        let encoded = encode_frame(&"some payload".to_string(), MAX_FRAME_BYTES).unwrap();
        for cut in [3, 8, encoded.len() - 1] {
            let err = decode_frame::<String>(&mut Cursor::new(&encoded[..cut])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnexpectedEof, "cut at {cut}");
        }
    }

    #[test]
    fn test_rejects_oversized_frames() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());
        bad.extend_from_slice(&0u32.to_le_bytes());
        let err = decode_frame::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));

        let err = encode_frame(&"x".repeat(64), 16).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header_validation() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        read_header(&mut Cursor::new(&buf)).unwrap();

        buf[0] = b'X';
        assert!(read_header(&mut Cursor::new(&buf)).is_err());
    }
}
