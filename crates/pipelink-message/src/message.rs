use bytes::Bytes;

use crate::error::Result;

/// A value that can travel as one pipelink frame.
///
/// Implementations must be lossless: `decode(encode(v))` yields a value
/// equal in content to `v`.
pub trait PipeMessage: Sized + Send + 'static {
    /// Serialize into the frame payload.
    fn encode(&self) -> Result<Bytes>;

    /// Rebuild a value from a frame payload.
    fn decode(bytes: Bytes) -> Result<Self>;
}

impl PipeMessage for Bytes {
    fn encode(&self) -> Result<Bytes> {
        Ok(self.clone())
    }

    fn decode(bytes: Bytes) -> Result<Self> {
        Ok(bytes)
    }
}

impl PipeMessage for Vec<u8> {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self))
    }

    fn decode(bytes: Bytes) -> Result<Self> {
        Ok(Vec::from(bytes))
    }
}

/// Text travels as UTF-8 with no terminator or byte order mark.
impl PipeMessage for String {
    fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }

    fn decode(bytes: Bytes) -> Result<Self> {
        Ok(String::from_utf8(Vec::from(bytes))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessageError;

    #[test]
    fn bytes_are_passed_through() {
        let original = Bytes::from_static(b"\x00\x01raw\xff");
        let encoded = original.encode().unwrap();
        assert_eq!(encoded, original);
        assert_eq!(Bytes::decode(encoded).unwrap(), original);
    }

    #[test]
    fn empty_vec_stays_empty() {
        let encoded = Vec::<u8>::new().encode().unwrap();
        assert!(encoded.is_empty());
        assert!(Vec::<u8>::decode(encoded).unwrap().is_empty());
    }

    #[test]
    fn text_is_utf8() {
        let text = "héllo, wörld ✓".to_string();
        let encoded = text.encode().unwrap();
        assert_eq!(encoded.as_ref(), text.as_bytes());
        assert_eq!(String::decode(encoded).unwrap(), text);
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = String::decode(Bytes::from_static(&[0xC3, 0x28])).unwrap_err();
        assert!(matches!(err, MessageError::InvalidUtf8(_)));
    }
}
