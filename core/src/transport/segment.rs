//! Segment wire format and segmentation
//!
//! BLE advertising frames are tiny, so encoded PDUs are split into chunks of
//! at most [`MAX_SEGMENT_PAYLOAD_SIZE`] bytes. Each chunk carries a 4-byte
//! big-endian header identifying the send it belongs to and its position.

use super::TransportError;

/// Largest chunk of PDU bytes a single segment may carry.
pub const MAX_SEGMENT_PAYLOAD_SIZE: usize = 16;

/// A message may span at most this many segments (the index is one byte).
pub const MAX_SEGMENTS: usize = 255;

/// One transport segment: header plus a chunk of PDU bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub seq_num: u16,
    pub segment_index: u8,
    pub total_segments: u8,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Size of the packed segment header in bytes.
    pub const HEADER_SIZE: usize = 4;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.seq_num.to_be_bytes());
        bytes.push(self.segment_index);
        bytes.push(self.total_segments);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransportError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(TransportError::SegmentTooShort {
                actual: bytes.len(),
                required: Self::HEADER_SIZE,
            });
        }

        let seq_num = u16::from_be_bytes([bytes[0], bytes[1]]);
        let segment_index = bytes[2];
        let total_segments = bytes[3];

        if total_segments == 0 || segment_index >= total_segments {
            return Err(TransportError::InvalidSegmentHeader {
                index: segment_index,
                total: total_segments,
            });
        }

        Ok(Self {
            seq_num,
            segment_index,
            total_segments,
            payload: bytes[Self::HEADER_SIZE..].to_vec(),
        })
    }
}

/// Split `data` into segments sharing `seq_num`.
///
/// Empty input and inputs needing more than [`MAX_SEGMENTS`] chunks are
/// rejected before anything hits the radio.
pub fn segment(seq_num: u16, data: &[u8]) -> Result<Vec<Segment>, TransportError> {
    if data.is_empty() {
        return Err(TransportError::EmptyPayload);
    }

    let total = data.len().div_ceil(MAX_SEGMENT_PAYLOAD_SIZE);
    if total > MAX_SEGMENTS {
        return Err(TransportError::TooManySegments {
            required: total,
            max: MAX_SEGMENTS,
        });
    }

    let segments = data
        .chunks(MAX_SEGMENT_PAYLOAD_SIZE)
        .enumerate()
        .map(|(index, chunk)| Segment {
            seq_num,
            segment_index: index as u8,
            total_segments: total as u8,
            payload: chunk.to_vec(),
        })
        .collect();

    Ok(segments)
}
