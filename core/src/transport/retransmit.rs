//! Retransmission queue for multi-segment sends
//!
//! A multi-segment send is fragile: losing any one advertisement loses the
//! whole message. Those sends are re-advertised on a fixed cadence until
//! acknowledged, retried out, or aged out. Single-segment frames ride the
//! flood and are not tracked here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::warn;

/// Minimum gap between re-sends of one entry.
pub const RETRANSMIT_INTERVAL: Duration = Duration::from_secs(1);

/// An entry is abandoned after this many re-sends.
pub const MAX_RETRIES: u32 = 5;

/// An entry is abandoned once it is this old, retries or not.
pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(30);

/// How often the owner should poll [`RetransmitQueue::due`].
pub const RETRANSMIT_TICK: Duration = Duration::from_millis(500);

/// At most this many entries are re-sent per poll.
pub const MAX_PER_TICK: usize = 5;

struct RetransmitEntry {
    frames: Vec<Vec<u8>>,
    created: Instant,
    last_sent: Instant,
    retries: u32,
}

/// Frames to put back on the air, plus sends that ran out of road.
#[derive(Debug, Default)]
pub struct DueRetransmissions {
    /// `(seq_num, frames)` pairs to re-advertise.
    pub resend: Vec<(u16, Vec<Vec<u8>>)>,
    /// Sequence numbers whose entries expired this poll.
    pub expired: Vec<u16>,
}

/// Tracks unacknowledged multi-segment sends by sequence number.
#[derive(Default)]
pub struct RetransmitQueue {
    entries: HashMap<u16, RetransmitEntry>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a send. `frames` are the fully encoded segment bytes
    /// in index order, as first transmitted at `now`.
    pub fn record(&mut self, seq_num: u16, frames: Vec<Vec<u8>>, now: Instant) {
        self.entries.insert(
            seq_num,
            RetransmitEntry {
                frames,
                created: now,
                last_sent: now,
                retries: 0,
            },
        );
    }

    /// Stop tracking a send; returns whether it was still live.
    pub fn acknowledge(&mut self, seq_num: u16) -> bool {
        self.entries.remove(&seq_num).is_some()
    }

    /// Collect work for one poll: expire dead entries, then hand back up to
    /// [`MAX_PER_TICK`] entries whose retransmit interval has elapsed. Each
    /// returned entry has its retry count and last-sent time advanced.
    pub fn due(&mut self, now: Instant) -> DueRetransmissions {
        let mut out = DueRetransmissions::default();

        let dead: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.retries >= MAX_RETRIES || now.duration_since(e.created) >= MAX_ENTRY_AGE
            })
            .map(|(seq, _)| *seq)
            .collect();
        for seq in dead {
            self.entries.remove(&seq);
            warn!(seq_num = seq, "abandoning retransmission");
            out.expired.push(seq);
        }

        for (seq, entry) in self.entries.iter_mut() {
            if out.resend.len() >= MAX_PER_TICK {
                break;
            }
            if now.duration_since(entry.last_sent) >= RETRANSMIT_INTERVAL {
                entry.last_sent = now;
                entry.retries += 1;
                out.resend.push((*seq, entry.frames.clone()));
            }
        }

        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
