//! Application-level replay suppression
//!
//! The network layer deduplicates on PDU frames, but a sender that
//! re-originates the same chat (retry after an ack was lost) mints a fresh
//! id. Each sender's recent sequence numbers are remembered in a bounded
//! window so the chat itself is delivered once.

use std::collections::{BTreeSet, HashMap};

/// Sequence numbers remembered per sender.
pub const SEEN_WINDOW_SIZE: usize = 100;

/// Per-sender sliding window of recently seen sequence numbers.
#[derive(Default)]
pub struct SeenWindow {
    by_sender: HashMap<u16, BTreeSet<u32>>,
}

impl SeenWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `(sender, sequence_number)`; returns `true` when unseen.
    /// When a sender's window is full the smallest sequence is evicted.
    pub fn insert(&mut self, sender: u16, sequence_number: u32) -> bool {
        let window = self.by_sender.entry(sender).or_default();
        if !window.insert(sequence_number) {
            return false;
        }
        if window.len() > SEEN_WINDOW_SIZE {
            if let Some(oldest) = window.iter().next().copied() {
                window.remove(&oldest);
            }
        }
        true
    }

    pub fn forget_sender(&mut self, sender: u16) {
        self.by_sender.remove(&sender);
    }
}
