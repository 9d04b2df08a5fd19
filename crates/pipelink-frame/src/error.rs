use std::fmt;

/// Where in a frame a truncation was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    /// Inside the length prefix.
    Prefix,
    /// Inside the payload.
    Payload,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStage::Prefix => f.write_str("length prefix"),
            FrameStage::Payload => f.write_str("payload"),
        }
    }
}

/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended part-way through a frame.
    #[error("truncated frame: stream ended in {stage} after {received} of {expected} bytes")]
    Truncated {
        stage: FrameStage,
        received: usize,
        expected: usize,
    },

    /// The stream stopped accepting bytes while a frame was being written.
    #[error("connection closed (incomplete frame write)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
