use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: a single little-endian `u32` payload length.
pub const HEADER_SIZE: usize = 4;

/// Largest payload the length prefix can describe.
pub const MAX_PAYLOAD_LIMIT: usize = u32::MAX as usize;

/// Default maximum payload size: 1 GiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024 * 1024;

/// Result of decoding from an in-memory buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was consumed; the payload may be empty.
    Payload(Bytes),
    /// The buffer does not hold a complete frame yet.
    NeedMoreData,
}

/// Build the length prefix for a payload of `len` bytes.
pub fn encode_header(len: usize) -> Result<[u8; HEADER_SIZE]> {
    let len = u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: MAX_PAYLOAD_LIMIT,
    })?;
    Ok(len.to_le_bytes())
}

/// Encode a payload into the wire format.
///
/// ```text
/// ┌──────────────┬──────────────────┐
/// │ Length       │ Payload          │
/// │ (4B LE u32)  │ (Length bytes)   │
/// └──────────────┴──────────────────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = encode_header(payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// On success, consumes the frame bytes from the buffer. A zero length
/// prefix yields an empty payload as soon as the prefix is complete.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Decoded> {
    if src.len() < HEADER_SIZE {
        return Ok(Decoded::NeedMoreData);
    }

    let mut prefix = [0u8; HEADER_SIZE];
    prefix.copy_from_slice(&src[..HEADER_SIZE]);
    let payload_len = u32::from_le_bytes(prefix) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(Decoded::NeedMoreData);
    }

    src.advance(HEADER_SIZE);
    Ok(Decoded::Payload(src.split_to(payload_len).freeze()))
}

/// Configuration for frame reading and writing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 1 GiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
