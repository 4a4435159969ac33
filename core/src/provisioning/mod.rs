//! GATT provisioning
//!
//! Brings a new device into the mesh: discover its beacon, connect over
//! GATT, negotiate the MTU, hand over fresh key material and assign it a
//! short address. The handshake logic lives in a pure state machine
//! ([`machine::ProvisioningMachine`]); [`Provisioner`] drives it against a
//! host-provided [`GattClient`] under one overall timeout.
//!
//! Unprovisioned devices announce themselves with a raw (unsegmented,
//! unencrypted) `ProvisioningRequest` PDU in their advertisement.

pub mod gatt;
pub mod machine;

pub use gatt::{GattClient, GattError, DATA_CHARACTERISTIC_UUID, PROVISIONING_SERVICE_UUID};
pub use machine::{
    ProvisioningCommand, ProvisioningEvent, ProvisioningKeys, ProvisioningMachine,
    ProvisioningState, KEY_BLOB_SIZE, REQUESTED_MTU,
};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::network::{MessageType, MeshPdu};
use crate::radio::{RadioError, RadioTransport, MANUFACTURER_ID};

/// Overall budget for one provisioning attempt.
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(30);

/// How long [`Provisioner::discover_nodes`] listens for beacons.
pub const DISCOVERY_WINDOW: Duration = Duration::from_secs(5);

/// Errors from provisioning.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("unexpected {event:?} in state {state:?}")]
    UnexpectedEvent {
        state: ProvisioningState,
        event: ProvisioningEvent,
    },

    #[error("provisioning of {0} already in progress")]
    AlreadyInFlight(String),

    #[error("provisioning timed out")]
    Timeout,

    #[error(transparent)]
    Gatt(#[from] GattError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("provisioning failed: {0}")]
    Failed(String),
}

/// An unprovisioned device seen during discovery.
#[derive(Debug, Clone)]
pub struct UnprovisionedNode {
    pub device_id: String,
    pub rssi: i16,
    pub device_name: Option<String>,
}

/// Outcome of a successful handshake.
pub struct ProvisionResult {
    pub device_id: String,
    pub address: u16,
    pub keys: ProvisioningKeys,
}

/// Runs provisioning handshakes and allocates addresses.
///
/// The provisioner itself holds address 1; the counter pre-increments, so
/// the first device joins as 2.
pub struct Provisioner {
    radio: Arc<dyn RadioTransport>,
    last_assigned: AtomicU16,
    in_flight: Mutex<HashSet<String>>,
}

impl Provisioner {
    pub fn new(radio: Arc<dyn RadioTransport>) -> Self {
        Self {
            radio,
            last_assigned: AtomicU16::new(1),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Scan for provisioning beacons for [`DISCOVERY_WINDOW`].
    pub async fn discover_nodes(&self) -> Result<Vec<UnprovisionedNode>, ProvisioningError> {
        let (tx, mut rx) = mpsc::channel(64);
        self.radio.start_scanning(tx).await?;

        let deadline = tokio::time::Instant::now() + DISCOVERY_WINDOW;
        let mut nodes: HashMap<String, UnprovisionedNode> = HashMap::new();

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(result)) => {
                    if result.manufacturer_id != MANUFACTURER_ID {
                        continue;
                    }
                    let is_beacon = MeshPdu::from_bytes(&result.payload)
                        .map(|pdu| pdu.message_type == MessageType::ProvisioningRequest)
                        .unwrap_or(false);
                    if is_beacon {
                        nodes.insert(
                            result.device_id.clone(),
                            UnprovisionedNode {
                                device_id: result.device_id,
                                rssi: result.rssi,
                                device_name: result.device_name,
                            },
                        );
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        if let Err(err) = self.radio.stop_scanning().await {
            debug!(%err, "stop_scanning after discovery failed");
        }
        debug!(found = nodes.len(), "discovery window closed");
        Ok(nodes.into_values().collect())
    }

    /// Provision `device_id` over `client`. One attempt per peer at a time;
    /// the whole handshake must finish within [`PROVISIONING_TIMEOUT`].
    pub async fn provision(
        &self,
        client: &dyn GattClient,
        device_id: &str,
    ) -> Result<ProvisionResult, ProvisioningError> {
        if !self.in_flight.lock().insert(device_id.to_string()) {
            return Err(ProvisioningError::AlreadyInFlight(device_id.to_string()));
        }

        let outcome = tokio::time::timeout(PROVISIONING_TIMEOUT, self.run(client, device_id)).await;
        self.in_flight.lock().remove(device_id);

        match outcome {
            Ok(result) => result,
            Err(_) => {
                let _ = client.disconnect().await;
                warn!(device_id, "provisioning timed out");
                Err(ProvisioningError::Timeout)
            }
        }
    }

    async fn run(
        &self,
        client: &dyn GattClient,
        device_id: &str,
    ) -> Result<ProvisionResult, ProvisioningError> {
        let address = self.last_assigned.fetch_add(1, Ordering::SeqCst) + 1;
        let keys = ProvisioningKeys::generate();
        let mut machine = ProvisioningMachine::new(address, &keys);
        machine.begin()?;

        debug!(device_id, address, "starting provisioning handshake");

        let mut queue: VecDeque<ProvisioningCommand> =
            machine.handle(ProvisioningEvent::DeviceFound)?.into();

        while let Some(command) = queue.pop_front() {
            if command == ProvisioningCommand::Disconnect {
                if let Err(err) = client.disconnect().await {
                    debug!(device_id, %err, "disconnect failed");
                }
                continue;
            }

            let event = match self.execute(client, command).await {
                Ok(event) => event,
                Err(err) => ProvisioningEvent::Failure(err.to_string()),
            };

            match machine.handle(event) {
                Ok(followups) => queue.extend(followups),
                Err(err) => {
                    let _ = client.disconnect().await;
                    return Err(err);
                }
            }
        }

        match machine.state() {
            ProvisioningState::Complete => {
                info!(device_id, address, "provisioned device");
                Ok(ProvisionResult {
                    device_id: device_id.to_string(),
                    address,
                    keys,
                })
            }
            _ => {
                let reason = machine
                    .failure_reason()
                    .unwrap_or("handshake ended prematurely")
                    .to_string();
                warn!(device_id, %reason, "provisioning failed");
                Err(ProvisioningError::Failed(reason))
            }
        }
    }

    async fn execute(
        &self,
        client: &dyn GattClient,
        command: ProvisioningCommand,
    ) -> Result<ProvisioningEvent, GattError> {
        match command {
            ProvisioningCommand::Connect => {
                client.connect().await?;
                Ok(ProvisioningEvent::Connected)
            }
            ProvisioningCommand::RequestMtu(mtu) => {
                let granted = client.request_mtu(mtu).await?;
                Ok(ProvisioningEvent::MtuNegotiated(granted))
            }
            ProvisioningCommand::DiscoverServices => {
                client.discover_services().await?;
                Ok(ProvisioningEvent::ServicesDiscovered)
            }
            ProvisioningCommand::ReadCapabilities => {
                let value = client
                    .read_characteristic(PROVISIONING_SERVICE_UUID, DATA_CHARACTERISTIC_UUID)
                    .await?;
                Ok(ProvisioningEvent::CapabilitiesRead(value))
            }
            ProvisioningCommand::WriteKeys(blob) => {
                client
                    .write_characteristic(
                        PROVISIONING_SERVICE_UUID,
                        DATA_CHARACTERISTIC_UUID,
                        &blob,
                    )
                    .await?;
                Ok(ProvisioningEvent::WriteCompleted)
            }
            ProvisioningCommand::WriteAddress(bytes) => {
                client
                    .write_characteristic(
                        PROVISIONING_SERVICE_UUID,
                        DATA_CHARACTERISTIC_UUID,
                        &bytes,
                    )
                    .await?;
                Ok(ProvisioningEvent::WriteCompleted)
            }
            // Handled by the driver loop before execution.
            ProvisioningCommand::Disconnect => Ok(ProvisioningEvent::Disconnected),
        }
    }
}
