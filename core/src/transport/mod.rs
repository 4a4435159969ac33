//! Segmentation transport
//!
//! Outgoing payloads are cut into advertisement-sized segments (the network
//! layer wraps each one in its own PDU), incoming segments are reassembled
//! per sender, and fragile multi-segment sends are re-advertised until
//! acknowledged.

pub mod reassembly;
pub mod retransmit;
pub mod segment;

pub use reassembly::{Reassembler, REASSEMBLY_TIMEOUT};
pub use retransmit::{
    DueRetransmissions, RetransmitQueue, MAX_ENTRY_AGE, MAX_PER_TICK, MAX_RETRIES,
    RETRANSMIT_INTERVAL, RETRANSMIT_TICK,
};
pub use segment::{segment, Segment, MAX_SEGMENTS, MAX_SEGMENT_PAYLOAD_SIZE};

use thiserror::Error;

/// Errors from the segmentation transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("cannot segment an empty payload")]
    EmptyPayload,

    #[error("payload needs {required} segments, maximum is {max}")]
    TooManySegments { required: usize, max: usize },

    #[error("segment too short: {actual} bytes, need at least {required}")]
    SegmentTooShort { actual: usize, required: usize },

    #[error("invalid segment header: index {index} of {total}")]
    InvalidSegmentHeader { index: u8, total: u8 },

    #[error("segment for seq {seq_num} claims {actual} total, buffer expects {expected}")]
    SegmentMismatch {
        seq_num: u16,
        expected: u8,
        actual: u8,
    },

    #[error("reassembly buffer for seq {seq_num} disappeared")]
    ReassemblyGone { seq_num: u16 },
}
