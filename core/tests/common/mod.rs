//! Shared test doubles: an in-memory "air" connecting fake radios.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use emberlink_core::{RadioError, RadioTransport, ScanMode, ScanResult};

const MANUFACTURER_ID: u16 = 0xFFFF;

/// Simulated radio medium with explicit adjacency, so tests can build
/// line and partitioned topologies.
#[derive(Default)]
pub struct AirBus {
    sinks: Mutex<HashMap<String, mpsc::Sender<ScanResult>>>,
    links: Mutex<HashMap<String, HashSet<String>>>,
}

impl AirBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connect two devices bidirectionally.
    pub fn link(&self, a: &str, b: &str) {
        let mut links = self.links.lock();
        links.entry(a.to_string()).or_default().insert(b.to_string());
        links.entry(b.to_string()).or_default().insert(a.to_string());
    }

    pub fn radio(self: &Arc<Self>, device_id: &str) -> Arc<BusRadio> {
        Arc::new(BusRadio {
            device_id: device_id.to_string(),
            bus: Arc::clone(self),
        })
    }

    fn broadcast(&self, from: &str, frame: &[u8]) {
        let neighbours = self
            .links
            .lock()
            .get(from)
            .cloned()
            .unwrap_or_default();
        let sinks = self.sinks.lock();
        for neighbour in neighbours {
            if let Some(sink) = sinks.get(&neighbour) {
                let _ = sink.try_send(ScanResult {
                    device_id: from.to_string(),
                    rssi: -40,
                    manufacturer_id: MANUFACTURER_ID,
                    payload: frame.to_vec(),
                    device_name: None,
                });
            }
        }
    }
}

/// One fake radio attached to the bus.
pub struct BusRadio {
    device_id: String,
    bus: Arc<AirBus>,
}

#[async_trait]
impl RadioTransport for BusRadio {
    async fn start_advertising(&self, frame: &[u8]) -> Result<(), RadioError> {
        self.bus.broadcast(&self.device_id, frame);
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn start_scanning(&self, sink: mpsc::Sender<ScanResult>) -> Result<(), RadioError> {
        self.bus.sinks.lock().insert(self.device_id.clone(), sink);
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), RadioError> {
        self.bus.sinks.lock().remove(&self.device_id);
        Ok(())
    }

    async fn set_scan_mode(&self, _mode: ScanMode) -> Result<(), RadioError> {
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    condition()
}
