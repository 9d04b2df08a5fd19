//! Length-prefixed message framing.
//!
//! Every message travels as one frame:
//! - A 4-byte little-endian payload length
//! - Exactly that many payload bytes
//!
//! A length of zero is a valid, empty message. It is never confused with
//! the peer closing the stream, which the reader reports separately as
//! [`ReadOutcome::EndOfStream`].

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, encode_header, Decoded, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, MAX_PAYLOAD_LIMIT,
};
pub use error::{FrameError, FrameStage, Result};
pub use reader::{FrameReader, ReadOutcome};
pub use writer::FrameWriter;
