//! GATT client seam for provisioning
//!
//! Provisioning talks to the joining device over a GATT connection the host
//! platform owns. The stack only issues the operations below; the host maps
//! them onto its BLE bindings.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Mesh provisioning service.
pub const PROVISIONING_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x00001827_0000_1000_8000_00805f9b34fb);

/// Data-in/data-out characteristic on the provisioning service.
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00002ADD_0000_1000_8000_00805f9b34fb);

/// Errors surfaced by a GATT client implementation.
#[derive(Debug, Error, Clone)]
pub enum GattError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("MTU negotiation failed: {0}")]
    MtuFailed(String),

    #[error("service discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("characteristic read failed: {0}")]
    ReadFailed(String),

    #[error("characteristic write failed: {0}")]
    WriteFailed(String),

    #[error("peer disconnected")]
    Disconnected,
}

/// Host-provided GATT connection to one peer.
#[async_trait]
pub trait GattClient: Send + Sync {
    async fn connect(&self) -> Result<(), GattError>;

    /// Request an ATT MTU; returns the value the peer granted.
    async fn request_mtu(&self, mtu: u16) -> Result<u16, GattError>;

    async fn discover_services(&self) -> Result<(), GattError>;

    async fn read_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, GattError>;

    async fn write_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), GattError>;

    async fn disconnect(&self) -> Result<(), GattError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_render_as_bluetooth_base() {
        assert_eq!(
            PROVISIONING_SERVICE_UUID.to_string(),
            "00001827-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            DATA_CHARACTERISTIC_UUID.to_string(),
            "00002add-0000-1000-8000-00805f9b34fb"
        );
    }
}
