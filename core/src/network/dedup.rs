//! Frame deduplication
//!
//! A flooding mesh re-delivers every frame many times. Frames are remembered
//! by `(message_id, segment_index)` in a bounded cache so each one is
//! processed once while later segments of the same message still get
//! through; entries age out so the id space can be reused across long
//! sessions.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum frame keys remembered at once.
pub const DEDUP_CAPACITY: usize = 1000;

/// How long a frame key stays in the cache.
pub const DEDUP_ENTRY_TTL: Duration = Duration::from_secs(300);

/// How often the owner should call [`DedupCache::cleanup`].
pub const DEDUP_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Bounded first-seen cache of `(message_id, segment_index)` frame keys.
pub struct DedupCache {
    seen: HashMap<(u64, u8), Instant>,
    capacity: usize,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::with_capacity(DEDUP_CAPACITY)
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashMap::new(),
            capacity,
        }
    }

    /// Record one frame; returns `true` when it was not already known.
    /// At capacity, the oldest entry is evicted to make room.
    pub fn insert(&mut self, message_id: u64, segment_index: u8, now: Instant) -> bool {
        let key = (message_id, segment_index);
        if self.seen.contains_key(&key) {
            return false;
        }

        if self.seen.len() >= self.capacity {
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|(_, seen_at)| **seen_at)
                .map(|(key, _)| *key)
            {
                self.seen.remove(&oldest);
            }
        }

        self.seen.insert(key, now);
        true
    }

    /// Drop entries older than [`DEDUP_ENTRY_TTL`].
    pub fn cleanup(&mut self, now: Instant) {
        self.seen
            .retain(|_, seen_at| now.duration_since(*seen_at) < DEDUP_ENTRY_TTL);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_insert_is_new() {
        let mut cache = DedupCache::new();
        let now = Instant::now();
        assert!(cache.insert(1, 0, now));
        assert!(!cache.insert(1, 0, now));
    }

    #[test]
    fn test_segments_of_one_message_are_distinct() {
        let mut cache = DedupCache::new();
        let now = Instant::now();
        assert!(cache.insert(1, 0, now));
        assert!(cache.insert(1, 1, now));
        assert!(cache.insert(1, 2, now));
        assert!(!cache.insert(1, 1, now));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = DedupCache::with_capacity(3);
        let start = Instant::now();
        cache.insert(1, 0, start);
        cache.insert(2, 0, start + Duration::from_millis(1));
        cache.insert(3, 0, start + Duration::from_millis(2));

        // Forces out id 1, the oldest.
        cache.insert(4, 0, start + Duration::from_millis(3));
        assert_eq!(cache.len(), 3);
        assert!(cache.insert(1, 0, start + Duration::from_millis(4)));
    }

    #[test]
    fn test_cleanup_expires_old_entries() {
        let mut cache = DedupCache::new();
        let start = Instant::now();
        cache.insert(1, 0, start);
        cache.insert(2, 0, start + DEDUP_ENTRY_TTL);

        cache.cleanup(start + DEDUP_ENTRY_TTL);
        assert_eq!(cache.len(), 1);
        assert!(cache.insert(1, 0, start + DEDUP_ENTRY_TTL));
    }
}
