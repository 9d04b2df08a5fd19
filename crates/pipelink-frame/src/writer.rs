use std::io::{ErrorKind, Write};

use pipelink_transport::IpcStream;
use tracing::trace;

use crate::codec::{encode_header, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete frames to any `Write` stream.
///
/// The payload is written straight after the prefix without being copied
/// into an intermediate frame buffer, so very large messages cost no extra
/// memory.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Frame and send one payload (blocking).
    pub fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let header = encode_header(payload.len())?;
        self.write_all(&header)?;
        self.write_all(payload)?;
        self.flush()?;

        trace!(size = payload.len(), "wrote frame");
        Ok(())
    }

    fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            match self.inner.write(buf) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => buf = &buf[n..],
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(write_error(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(write_error(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// A blocking stream reports an expired write timeout as `WouldBlock`.
fn write_error(err: std::io::Error) -> FrameError {
    if err.kind() == ErrorKind::WouldBlock {
        FrameError::Io(std::io::Error::new(ErrorKind::TimedOut, "frame write timed out"))
    } else {
        FrameError::Io(err)
    }
}

impl FrameWriter<IpcStream> {
    /// Create a frame writer for `IpcStream` and apply write timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{decode_frame, Decoded, HEADER_SIZE};

    fn decode_all(wire: Vec<u8>) -> Vec<Vec<u8>> {
        let mut buf = BytesMut::from(wire.as_slice());
        let mut out = Vec::new();
        while let Decoded::Payload(payload) = decode_frame(&mut buf, usize::MAX).unwrap() {
            out.push(payload.to_vec());
        }
        assert!(buf.is_empty(), "trailing bytes after last frame");
        out
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(b"hello").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(wire.len(), HEADER_SIZE + 5);
        assert_eq!(decode_all(wire), vec![b"hello".to_vec()]);
    }

    #[test]
    fn write_multiple_frames_including_empty() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::<u8>::new()));

        writer.send(b"one").unwrap();
        writer.send(b"").unwrap();
        writer.send(b"three").unwrap();

        let wire = writer.into_inner().into_inner();
        assert_eq!(
            decode_all(wire),
            vec![b"one".to_vec(), Vec::new(), b"three".to_vec()]
        );
    }

    #[test]
    fn payload_too_large_rejected() {
        let cfg = FrameConfig {
            max_payload_size: 4,
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer.send(b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(writer.get_ref().get_ref().is_empty(), "nothing written");
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = FrameWriter::new(sink);

        writer.send(b"x").unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn interrupted_writes_are_retried() {
        let mut writer = FrameWriter::new(FlakyWriter {
            fail_write: Some(ErrorKind::Interrupted),
            fail_flush: Some(ErrorKind::Interrupted),
            data: Vec::new(),
        });
        writer.send(b"retry").unwrap();

        let inner = writer.into_inner();
        assert_eq!(decode_all(inner.data), vec![b"retry".to_vec()]);
    }

    #[test]
    fn would_block_is_reported_as_timeout() {
        let mut writer = FrameWriter::new(FlakyWriter {
            fail_write: Some(ErrorKind::WouldBlock),
            fail_flush: None,
            data: Vec::new(),
        });
        let err = writer.send(b"stuck").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));

        let mut writer = FrameWriter::new(FlakyWriter {
            fail_write: None,
            fail_flush: Some(ErrorKind::WouldBlock),
            data: Vec::new(),
        });
        let err = writer.send(b"stuck").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
    }

    #[test]
    fn write_timeout_fires_when_peer_stops_reading() {
        let (left, _right) = IpcStream::pair().unwrap();
        let cfg = FrameConfig {
            write_timeout: Some(std::time::Duration::from_millis(50)),
            ..FrameConfig::default()
        };
        let mut writer = FrameWriter::with_config_ipc(left, cfg).unwrap();

        let started = std::time::Instant::now();
        let err = writer.send(&vec![7u8; 16 * 1024 * 1024]).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::TimedOut));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TrickleWriter { data: Vec::new() });
        writer.send(b"a longer payload").unwrap();
        let inner = writer.into_inner();
        assert_eq!(decode_all(inner.data), vec![b"a longer payload".to_vec()]);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = FrameWriter::new(ZeroWriter);
        let err = writer.send(b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn write_to_shut_down_stream_fails() {
        let (left, right) = IpcStream::pair().unwrap();
        drop(right);
        let mut writer = FrameWriter::with_config_ipc(left, FrameConfig::default()).unwrap();
        let err = writer.send(b"nobody home").unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FlakyWriter {
        fail_write: Option<ErrorKind>,
        fail_flush: Option<ErrorKind>,
        data: Vec<u8>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(kind) = self.fail_write.take() {
                return Err(std::io::Error::from(kind));
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if let Some(kind) = self.fail_flush.take() {
                return Err(std::io::Error::from(kind));
            }
            Ok(())
        }
    }

    struct TrickleWriter {
        data: Vec<u8>,
    }

    impl Write for TrickleWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
