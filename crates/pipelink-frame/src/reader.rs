use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use pipelink_transport::IpcStream;
use tracing::trace;

use crate::codec::{FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, FrameStage, Result};

/// Upper bound on how much payload buffer is grown per read call, so a
/// large announced length is only backed by memory as bytes actually arrive.
const READ_CHUNK_SIZE: usize = 256 * 1024;

/// Result of reading one frame from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete payload, possibly empty.
    Payload(Bytes),
    /// The peer closed the stream cleanly on a frame boundary.
    EndOfStream,
}

/// Reads complete frames from any `Read` stream.
///
/// Short reads are retried until the prefix and payload are complete, so
/// callers always see whole messages.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns [`ReadOutcome::EndOfStream`] only when the stream ends before
    /// the first prefix byte. Ending anywhere later is
    /// [`FrameError::Truncated`].
    pub fn read_frame(&mut self) -> Result<ReadOutcome> {
        let mut prefix = [0u8; HEADER_SIZE];
        let filled = self.fill(&mut prefix)?;
        if filled == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }
        if filled < HEADER_SIZE {
            return Err(FrameError::Truncated {
                stage: FrameStage::Prefix,
                received: filled,
                expected: HEADER_SIZE,
            });
        }

        let len = u32::from_le_bytes(prefix) as usize;
        if len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }
        if len == 0 {
            return Ok(ReadOutcome::Payload(Bytes::new()));
        }

        let mut payload = BytesMut::with_capacity(len.min(READ_CHUNK_SIZE));
        while payload.len() < len {
            let start = payload.len();
            let want = (len - start).min(READ_CHUNK_SIZE);
            payload.resize(start + want, 0);
            let read = self.fill(&mut payload[start..])?;
            payload.truncate(start + read);
            if read < want {
                return Err(FrameError::Truncated {
                    stage: FrameStage::Payload,
                    received: payload.len(),
                    expected: len,
                });
            }
        }

        trace!(size = len, "read frame");
        Ok(ReadOutcome::Payload(payload.freeze()))
    }

    /// Fill `buf` completely unless the stream ends first; returns bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(filled)
    }
}

impl FrameReader<IpcStream> {
    /// Create a frame reader for `IpcStream` and apply read timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: pipelink_transport::TransportError) -> FrameError {
    match err {
        pipelink_transport::TransportError::Io(io)
        | pipelink_transport::TransportError::Accept(io) => FrameError::Io(io),
        pipelink_transport::TransportError::Bind { source, .. }
        | pipelink_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
