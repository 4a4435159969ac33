//! Segment reassembly
//!
//! Incoming segments are buffered per `(src, seq_num)` until every slot is
//! filled, then stitched back into the original payload bytes. Keying on
//! the source address keeps concurrent senders whose sequence numbers
//! collide out of each other's buffers. Buffers that go quiet are swept so
//! a lost segment cannot pin memory forever.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use super::segment::Segment;
use super::TransportError;

/// A reassembly buffer idle for this long is evicted.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(10);

struct ReassemblyBuffer {
    total_segments: u8,
    received: u8,
    slots: Vec<Option<Vec<u8>>>,
    last_activity: Instant,
}

impl ReassemblyBuffer {
    fn new(total_segments: u8, now: Instant) -> Self {
        Self {
            total_segments,
            received: 0,
            slots: vec![None; total_segments as usize],
            last_activity: now,
        }
    }
}

/// Collects segments keyed by source address and sequence number.
#[derive(Default)]
pub struct Reassembler {
    buffers: HashMap<(u16, u16), ReassemblyBuffer>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one segment from `src`. Returns the complete payload bytes once
    /// the final slot fills, `None` while the message is still partial.
    ///
    /// Duplicate deliveries of a slot are idempotent: the received count
    /// only moves when a slot is first filled.
    pub fn add_segment(
        &mut self,
        src: u16,
        segment: Segment,
        now: Instant,
    ) -> Result<Option<Vec<u8>>, TransportError> {
        let key = (src, segment.seq_num);
        let buffer = self
            .buffers
            .entry(key)
            .or_insert_with(|| ReassemblyBuffer::new(segment.total_segments, now));

        if buffer.total_segments != segment.total_segments {
            return Err(TransportError::SegmentMismatch {
                seq_num: segment.seq_num,
                expected: buffer.total_segments,
                actual: segment.total_segments,
            });
        }

        buffer.last_activity = now;

        let slot = &mut buffer.slots[segment.segment_index as usize];
        if slot.is_none() {
            *slot = Some(segment.payload);
            buffer.received += 1;
        }

        if buffer.received == buffer.total_segments {
            let buffer = self
                .buffers
                .remove(&key)
                .ok_or(TransportError::ReassemblyGone {
                    seq_num: segment.seq_num,
                })?;
            let mut assembled = Vec::new();
            for slot in buffer.slots {
                match slot {
                    Some(chunk) => assembled.extend_from_slice(&chunk),
                    None => {
                        return Err(TransportError::ReassemblyGone {
                            seq_num: segment.seq_num,
                        })
                    }
                }
            }
            return Ok(Some(assembled));
        }

        Ok(None)
    }

    /// Drop buffers idle longer than [`REASSEMBLY_TIMEOUT`]. Returns how
    /// many were evicted.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buf| now.duration_since(buf.last_activity) < REASSEMBLY_TIMEOUT);
        let evicted = before - self.buffers.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale reassembly buffers");
        }
        evicted
    }

    pub fn pending(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::segment::segment;

    const SRC: u16 = 7;

    #[test]
    fn test_in_order_reassembly() {
        let data: Vec<u8> = (0..40).collect();
        let segments = segment(1, &data).unwrap();
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        assert_eq!(
            reassembler.add_segment(SRC, segments[0].clone(), now).unwrap(),
            None
        );
        assert_eq!(
            reassembler.add_segment(SRC, segments[1].clone(), now).unwrap(),
            None
        );
        let out = reassembler.add_segment(SRC, segments[2].clone(), now).unwrap();
        assert_eq!(out, Some(data));
        assert_eq!(reassembler.pending(), 0);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let data: Vec<u8> = (0..40).collect();
        let segments = segment(2, &data).unwrap();
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        assert_eq!(
            reassembler.add_segment(SRC, segments[2].clone(), now).unwrap(),
            None
        );
        assert_eq!(
            reassembler.add_segment(SRC, segments[0].clone(), now).unwrap(),
            None
        );
        let out = reassembler.add_segment(SRC, segments[1].clone(), now).unwrap();
        assert_eq!(out, Some(data));
    }

    #[test]
    fn test_duplicate_segment_is_idempotent() {
        let data: Vec<u8> = (0..40).collect();
        let segments = segment(3, &data).unwrap();
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        assert_eq!(
            reassembler.add_segment(SRC, segments[0].clone(), now).unwrap(),
            None
        );
        // Same slot again must not count toward completion.
        assert_eq!(
            reassembler.add_segment(SRC, segments[0].clone(), now).unwrap(),
            None
        );
        assert_eq!(
            reassembler.add_segment(SRC, segments[1].clone(), now).unwrap(),
            None
        );
        let out = reassembler.add_segment(SRC, segments[2].clone(), now).unwrap();
        assert_eq!(out, Some(data));
    }

    #[test]
    fn test_senders_with_colliding_seq_nums_do_not_interleave() {
        let a_data = vec![0xAAu8; 40];
        let b_data = vec![0xBBu8; 40];
        let a_segments = segment(9, &a_data).unwrap();
        let b_segments = segment(9, &b_data).unwrap();
        let mut reassembler = Reassembler::new();
        let now = Instant::now();

        // Interleave two senders on the same seq_num.
        reassembler.add_segment(1, a_segments[0].clone(), now).unwrap();
        reassembler.add_segment(2, b_segments[0].clone(), now).unwrap();
        reassembler.add_segment(1, a_segments[1].clone(), now).unwrap();
        reassembler.add_segment(2, b_segments[1].clone(), now).unwrap();

        let a_out = reassembler.add_segment(1, a_segments[2].clone(), now).unwrap();
        assert_eq!(a_out, Some(a_data));
        let b_out = reassembler.add_segment(2, b_segments[2].clone(), now).unwrap();
        assert_eq!(b_out, Some(b_data));
    }

    #[test]
    fn test_total_mismatch_rejected() {
        let mut reassembler = Reassembler::new();
        let now = Instant::now();
        let a = Segment {
            seq_num: 4,
            segment_index: 0,
            total_segments: 3,
            payload: vec![1],
        };
        let b = Segment {
            seq_num: 4,
            segment_index: 1,
            total_segments: 2,
            payload: vec![2],
        };
        reassembler.add_segment(SRC, a, now).unwrap();
        assert!(matches!(
            reassembler.add_segment(SRC, b, now),
            Err(TransportError::SegmentMismatch { .. })
        ));
    }

    #[test]
    fn test_stale_buffer_swept() {
        let data: Vec<u8> = (0..40).collect();
        let segments = segment(5, &data).unwrap();
        let mut reassembler = Reassembler::new();
        let start = Instant::now();

        reassembler.add_segment(SRC, segments[0].clone(), start).unwrap();
        assert_eq!(reassembler.pending(), 1);

        assert_eq!(reassembler.sweep(start + REASSEMBLY_TIMEOUT), 1);
        assert_eq!(reassembler.pending(), 0);

        // The late remainder starts a fresh (never completing) buffer.
        assert_eq!(
            reassembler
                .add_segment(SRC, segments[1].clone(), start + REASSEMBLY_TIMEOUT)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_single_segment_completes_immediately() {
        let mut reassembler = Reassembler::new();
        let segments = segment(6, &[9, 9, 9]).unwrap();
        let out = reassembler
            .add_segment(SRC, segments[0].clone(), Instant::now())
            .unwrap();
        assert_eq!(out, Some(vec![9, 9, 9]));
    }
}
