//! Radio abstraction
//!
//! The stack never touches a platform BLE API directly. A host embedding
//! this crate supplies a [`RadioTransport`] that can advertise manufacturer
//! data frames and scan for them; scan results flow back over an mpsc sink.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Manufacturer ID carried in every mesh advertising frame.
pub const MANUFACTURER_ID: u16 = 0xFFFF;

/// Errors surfaced by a radio implementation.
#[derive(Debug, Error, Clone)]
pub enum RadioError {
    #[error("advertising failed: {0}")]
    AdvertisingFailed(String),

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("radio unavailable: {0}")]
    Unavailable(String),
}

/// Scan power mode, alternated by the duty cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    HighPower,
    LowPower,
}

/// One observed advertisement.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Platform identifier for the advertising device (e.g. a MAC string).
    pub device_id: String,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Manufacturer ID from the advertisement.
    pub manufacturer_id: u16,
    /// Manufacturer data payload (one PDU frame).
    pub payload: Vec<u8>,
    /// Advertised local name, when present.
    pub device_name: Option<String>,
}

/// Host-provided BLE radio.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin advertising `frame` as manufacturer data, replacing any frame
    /// currently on the air.
    async fn start_advertising(&self, frame: &[u8]) -> Result<(), RadioError>;

    async fn stop_advertising(&self) -> Result<(), RadioError>;

    /// Begin scanning; every observed advertisement is delivered to `sink`.
    async fn start_scanning(&self, sink: mpsc::Sender<ScanResult>) -> Result<(), RadioError>;

    async fn stop_scanning(&self) -> Result<(), RadioError>;

    /// Switch scan power mode without interrupting the scan.
    async fn set_scan_mode(&self, mode: ScanMode) -> Result<(), RadioError>;
}
