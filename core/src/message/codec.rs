// Message codec — JSON + DEFLATE with size caps to fit radio frames

use std::io::Write;

use flate2::write::{DeflateDecoder, DeflateEncoder};
use flate2::Compression;
use thiserror::Error;

use super::types::MeshMessage;

/// Largest payload accepted for a segmented (GATT-sized) message.
pub const MAX_GATT_MESSAGE_SIZE: usize = 512;

/// Largest chat body accepted before serialization.
pub const MAX_CONTENT_SIZE: usize = 1024;

/// Errors from the chat message codec.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encoded message is {actual} bytes, cap is {cap}")]
    CapacityExceeded { actual: usize, cap: usize },

    #[error("content is {actual} bytes, cap is {cap}")]
    ContentTooLarge { actual: usize, cap: usize },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compress(std::io::Error),

    #[error("decompression failed: {0}")]
    Decompress(std::io::Error),
}

/// Serialize `msg` to JSON and deflate it.
pub fn encode(msg: &MeshMessage) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_vec(msg)?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(CodecError::Compress)?;
    encoder.finish().map_err(CodecError::Compress)
}

/// Inverse of [`encode`].
pub fn decode(data: &[u8]) -> Result<MeshMessage, CodecError> {
    let mut decoder = DeflateDecoder::new(Vec::new());
    decoder.write_all(data).map_err(CodecError::Decompress)?;
    let json = decoder.finish().map_err(CodecError::Decompress)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Reject payloads that would not fit the chosen frame budget.
pub fn ensure_fits(encoded_len: usize, cap: usize) -> Result<(), CodecError> {
    if encoded_len > cap {
        return Err(CodecError::CapacityExceeded {
            actual: encoded_len,
            cap,
        });
    }
    Ok(())
}
