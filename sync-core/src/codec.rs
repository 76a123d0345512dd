//! Compression codecs for cached payloads.
//!
//! The cache treats compression as an opaque transform: anything that can
//! turn bytes into bytes and back implements [`Codec`].

use thiserror::Error;

/// Payloads larger than this many bytes are compressed before storage.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Encoded bytes could not be decoded.
    #[error("{codec} decode failed: {reason}")]
    Decode {
        /// Codec name.
        codec: &'static str,
        /// Underlying failure.
        reason: String,
    },
}

/// Reversible byte transform.
pub trait Codec: Send + Sync {
    /// Short codec name for logs.
    fn name(&self) -> &'static str;

    /// Transform raw bytes into stored bytes.
    fn encode(&self, data: &[u8]) -> Vec<u8>;

    /// Reverse [`Codec::encode`].
    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// LZ4 block compression with the uncompressed size prepended.
#[derive(Debug, Default, Clone, Copy)]
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn encode(&self, data: &[u8]) -> Vec<u8> {
        lz4_flex::compress_prepend_size(data)
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| CodecError::Decode {
            codec: self.name(),
            reason: e.to_string(),
        })
    }
}

/// Pass-through codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn encode(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lz4_shrinks_repetitive_data() {
        let data = vec![b'a'; 8192];
        let encoded = Lz4Codec.encode(&data);
        assert!(encoded.len() < data.len() / 10);
        assert_eq!(Lz4Codec.decode(&encoded).unwrap(), data);
    }

    #[test]
    fn lz4_decode_rejects_garbage() {
        let result = Lz4Codec.decode(&[0x10, 0x00, 0x00, 0x00, 0xFF]);
        assert!(matches!(result, Err(CodecError::Decode { codec: "lz4", .. })));
    }

    #[test]
    fn identity_is_pass_through() {
        let data = b"unchanged".to_vec();
        assert_eq!(IdentityCodec.encode(&data), data);
        assert_eq!(IdentityCodec.decode(&data).unwrap(), data);
    }
}
