//! Peer table
//!
//! Tracks nodes heard from presence and nickname traffic. Callers see only
//! recently visible peers, ordered strongest-signal first; entries that go
//! quiet are evicted by the presence loop.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::message::Peer;

/// A peer is reported as visible for this long after last being heard.
pub const PEER_VISIBLE_WINDOW: Duration = Duration::from_secs(30);

/// A peer silent for this long is dropped from the table.
pub const PEER_STALE_AFTER: Duration = Duration::from_secs(60);

/// Shared table of nearby nodes keyed by mesh address.
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<u16, Peer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a peer observation.
    pub fn upsert(&self, address: u16, device_id: &str, nickname: &str, rssi: i16, now: Instant) {
        let mut peers = self.peers.write();
        peers
            .entry(address)
            .and_modify(|peer| {
                peer.device_id = device_id.to_string();
                if !nickname.is_empty() {
                    peer.nickname = nickname.to_string();
                }
                peer.rssi = rssi;
                peer.last_seen = now;
            })
            .or_insert_with(|| Peer {
                device_id: device_id.to_string(),
                address,
                nickname: nickname.to_string(),
                rssi,
                last_seen: now,
            });
    }

    /// Peers heard within [`PEER_VISIBLE_WINDOW`], strongest signal first.
    pub fn visible(&self, now: Instant) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .peers
            .read()
            .values()
            .filter(|peer| now.duration_since(peer.last_seen) < PEER_VISIBLE_WINDOW)
            .cloned()
            .collect();
        peers.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        peers
    }

    pub fn get(&self, address: u16) -> Option<Peer> {
        self.peers.read().get(&address).cloned()
    }

    /// Drop peers silent longer than [`PEER_STALE_AFTER`]. Returns how many
    /// were removed.
    pub fn evict_stale(&self, now: Instant) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, peer| now.duration_since(peer.last_seen) < PEER_STALE_AFTER);
        let evicted = before - peers.len();
        if evicted > 0 {
            debug!(evicted, "evicted stale peers");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}
