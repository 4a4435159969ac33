//! Provisioning state machine
//!
//! Pure events-in, commands-out. The machine never touches the radio or a
//! GATT connection; the driver in the parent module executes each command
//! and feeds the outcome back as the next event. Unexpected events are
//! rejected rather than ignored, so a confused peer cannot stall the
//! handshake half-joined.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::ProvisioningError;
use crate::crypto::KEY_SIZE;

/// ATT MTU requested from the joining device.
pub const REQUESTED_MTU: u16 = 517;

/// Size of the key-exchange write: network, app and device keys.
pub const KEY_BLOB_SIZE: usize = 3 * KEY_SIZE;

/// Where a provisioning attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    Discovering,
    Connecting,
    MtuNegotiation,
    CapabilitiesExchange,
    KeyExchange,
    AddressAssignment,
    Complete,
    Failed,
}

impl ProvisioningState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProvisioningState::Complete | ProvisioningState::Failed)
    }
}

/// What happened on the GATT side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningEvent {
    DeviceFound,
    Connected,
    MtuNegotiated(u16),
    ServicesDiscovered,
    CapabilitiesRead(Vec<u8>),
    WriteCompleted,
    Disconnected,
    Failure(String),
}

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningCommand {
    Connect,
    RequestMtu(u16),
    DiscoverServices,
    ReadCapabilities,
    /// 48 bytes: network key, app key, device key.
    WriteKeys(Vec<u8>),
    /// Assigned address, little-endian.
    WriteAddress([u8; 2]),
    Disconnect,
}

/// Fresh key material granted to one joining device.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProvisioningKeys {
    pub network: [u8; KEY_SIZE],
    pub app: [u8; KEY_SIZE],
    pub device: [u8; KEY_SIZE],
}

impl ProvisioningKeys {
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut keys = Self {
            network: [0u8; KEY_SIZE],
            app: [0u8; KEY_SIZE],
            device: [0u8; KEY_SIZE],
        };
        rng.fill_bytes(&mut keys.network);
        rng.fill_bytes(&mut keys.app);
        rng.fill_bytes(&mut keys.device);
        keys
    }

    /// The concatenated key-exchange write.
    pub fn blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(KEY_BLOB_SIZE);
        blob.extend_from_slice(&self.network);
        blob.extend_from_slice(&self.app);
        blob.extend_from_slice(&self.device);
        blob
    }
}

/// One provisioning attempt against one peer.
pub struct ProvisioningMachine {
    state: ProvisioningState,
    address: u16,
    key_blob: Vec<u8>,
    failure: Option<String>,
}

impl ProvisioningMachine {
    pub fn new(address: u16, keys: &ProvisioningKeys) -> Self {
        Self {
            state: ProvisioningState::Idle,
            address,
            key_blob: keys.blob(),
            failure: None,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    pub fn assigned_address(&self) -> u16 {
        self.address
    }

    /// Why the machine failed, if it did.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Move from `Idle` into `Discovering`.
    pub fn begin(&mut self) -> Result<(), ProvisioningError> {
        if self.state != ProvisioningState::Idle {
            return Err(ProvisioningError::UnexpectedEvent {
                state: self.state,
                event: ProvisioningEvent::DeviceFound,
            });
        }
        self.state = ProvisioningState::Discovering;
        Ok(())
    }

    /// Feed one event; returns the commands to execute next.
    pub fn handle(
        &mut self,
        event: ProvisioningEvent,
    ) -> Result<Vec<ProvisioningCommand>, ProvisioningError> {
        if self.state.is_terminal() {
            return Err(ProvisioningError::UnexpectedEvent {
                state: self.state,
                event,
            });
        }

        // Failure paths are legal from every live state.
        match &event {
            ProvisioningEvent::Failure(reason) => {
                self.failure = Some(reason.clone());
                self.state = ProvisioningState::Failed;
                return Ok(vec![ProvisioningCommand::Disconnect]);
            }
            ProvisioningEvent::Disconnected => {
                self.failure = Some("peer disconnected".to_string());
                self.state = ProvisioningState::Failed;
                return Ok(Vec::new());
            }
            _ => {}
        }

        let (next, commands) = match (self.state, &event) {
            (ProvisioningState::Discovering, ProvisioningEvent::DeviceFound) => (
                ProvisioningState::Connecting,
                vec![ProvisioningCommand::Connect],
            ),
            (ProvisioningState::Connecting, ProvisioningEvent::Connected) => (
                ProvisioningState::MtuNegotiation,
                vec![ProvisioningCommand::RequestMtu(REQUESTED_MTU)],
            ),
            (ProvisioningState::MtuNegotiation, ProvisioningEvent::MtuNegotiated(_)) => (
                ProvisioningState::CapabilitiesExchange,
                vec![ProvisioningCommand::DiscoverServices],
            ),
            (ProvisioningState::CapabilitiesExchange, ProvisioningEvent::ServicesDiscovered) => (
                ProvisioningState::CapabilitiesExchange,
                vec![ProvisioningCommand::ReadCapabilities],
            ),
            (ProvisioningState::CapabilitiesExchange, ProvisioningEvent::CapabilitiesRead(_)) => (
                ProvisioningState::KeyExchange,
                vec![ProvisioningCommand::WriteKeys(self.key_blob.clone())],
            ),
            (ProvisioningState::KeyExchange, ProvisioningEvent::WriteCompleted) => (
                ProvisioningState::AddressAssignment,
                vec![ProvisioningCommand::WriteAddress(self.address.to_le_bytes())],
            ),
            (ProvisioningState::AddressAssignment, ProvisioningEvent::WriteCompleted) => (
                ProvisioningState::Complete,
                vec![ProvisioningCommand::Disconnect],
            ),
            (state, _) => {
                self.state = ProvisioningState::Failed;
                return Err(ProvisioningError::UnexpectedEvent { state, event });
            }
        };

        self.state = next;
        Ok(commands)
    }
}
