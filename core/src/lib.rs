// EmberLink — BLE mesh chat without infrastructure
//
// "Can two people standing in a field exchange a message
//  with nothing but the radios already in their pockets?"
//
// Everything in this crate serves that question.

pub mod crypto;
pub mod message;
pub mod network;
pub mod peers;
pub mod provisioning;
pub mod radio;
pub mod store;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use crypto::{KeyType, SecurityError, SecurityLayer};
pub use message::{
    ChatMessage, CodecError, DeliveryStatus, MeshMessage, Peer, SeenWindow, MAX_CONTENT_SIZE,
    MAX_GATT_MESSAGE_SIZE,
};
pub use network::{
    FormatError, InboundMessage, MeshNetwork, MeshPdu, MessageType, NetworkError, SendHandle,
    BROADCAST_ADDR, MAX_TTL,
};
pub use peers::PeerTable;
pub use provisioning::{
    GattClient, GattError, ProvisionResult, Provisioner, ProvisioningError, ProvisioningState,
    UnprovisionedNode,
};
pub use radio::{RadioError, RadioTransport, ScanMode, ScanResult};
pub use store::{MemoryMessageStore, MessageStore, StoreError};
pub use transport::TransportError;

/// How often presence and nickname broadcasts go out while running.
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(30);

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Top-level error for the chat façade.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("already running")]
    AlreadyRunning,

    #[error("not running")]
    NotRunning,

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Node configuration for [`MeshChat`].
#[derive(Debug, Clone)]
pub struct MeshChatConfig {
    /// Nickname broadcast to nearby peers.
    pub nickname: String,
    /// This node's provisioned mesh address.
    pub address: u16,
}

impl MeshChatConfig {
    pub fn new(nickname: impl Into<String>, address: u16) -> Self {
        Self {
            nickname: nickname.into(),
            address,
        }
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        if self.nickname.trim().is_empty() {
            return Err(MeshError::InvalidConfig("nickname must not be empty".into()));
        }
        if self.nickname.len() > 32 {
            return Err(MeshError::InvalidConfig(
                "nickname must be at most 32 bytes".into(),
            ));
        }
        if self.address == 0 || self.address == BROADCAST_ADDR {
            return Err(MeshError::InvalidConfig(format!(
                "address {:#06x} is reserved",
                self.address
            )));
        }
        Ok(())
    }
}

// ============================================================================
// DELEGATE TRAIT
// ============================================================================

/// Callback interface for host applications (UI refresh, notifications).
pub trait MeshDelegate: Send + Sync {
    /// A chat message arrived and was stored.
    fn message_received(&self, message: &ChatMessage);
    /// A previously sent message was acknowledged by its recipient.
    fn message_delivered(&self, id: Uuid);
    /// A peer was heard from or changed nickname.
    fn peer_updated(&self, peer: &Peer);
    /// A provisioning attempt reached a terminal state.
    fn provisioning_event(&self, device_id: &str, state: ProvisioningState) {
        let _ = (device_id, state);
    }
}

// ============================================================================
// MESH CHAT FACADE
// ============================================================================

struct ChatInner {
    config: MeshChatConfig,
    security: Arc<SecurityLayer>,
    network: Arc<MeshNetwork>,
    provisioner: Arc<Provisioner>,
    store: Arc<dyn MessageStore>,
    peers: Arc<PeerTable>,
    delegate: RwLock<Option<Arc<dyn MeshDelegate>>>,
    seen: Mutex<SeenWindow>,
    sequence: AtomicU32,
    // network message_id -> chat message id, for ack correlation
    pending_chats: Mutex<HashMap<u64, Uuid>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    running: RwLock<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The application entry point: one instance per node. Cheap to clone;
/// clones share the same node.
#[derive(Clone)]
pub struct MeshChat {
    inner: Arc<ChatInner>,
}

impl MeshChat {
    /// Build the stack. The radio and store are host-provided seams.
    pub fn new(
        config: MeshChatConfig,
        radio: Arc<dyn RadioTransport>,
        store: Arc<dyn MessageStore>,
    ) -> Result<Self, MeshError> {
        config.validate()?;
        init_tracing();

        let security = Arc::new(SecurityLayer::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let network = Arc::new(MeshNetwork::new(
            config.address,
            Arc::clone(&radio),
            Arc::clone(&security),
            inbound_tx,
        ));
        let provisioner = Arc::new(Provisioner::new(radio));

        Ok(Self {
            inner: Arc::new(ChatInner {
                config,
                security,
                network,
                provisioner,
                store,
                peers: Arc::new(PeerTable::new()),
                delegate: RwLock::new(None),
                seen: Mutex::new(SeenWindow::new()),
                sequence: AtomicU32::new(0),
                pending_chats: Mutex::new(HashMap::new()),
                inbound_rx: Mutex::new(Some(inbound_rx)),
                running: RwLock::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn set_delegate(&self, delegate: Arc<dyn MeshDelegate>) {
        *self.inner.delegate.write() = Some(delegate);
    }

    pub fn own_address(&self) -> u16 {
        self.inner.config.address
    }

    pub fn nickname(&self) -> &str {
        &self.inner.config.nickname
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.read()
    }

    /// Derive the key set from `master_secret` and bring the node online.
    pub async fn start(&self, master_secret: &[u8]) -> Result<(), MeshError> {
        {
            let mut running = self.inner.running.write();
            if *running {
                return Err(MeshError::AlreadyRunning);
            }
            *running = true;
        }

        if let Err(err) = self.inner.security.install_derived(master_secret) {
            *self.inner.running.write() = false;
            return Err(err.into());
        }
        if let Err(err) = Arc::clone(&self.inner.network).start().await {
            *self.inner.running.write() = false;
            return Err(err.into());
        }

        // Inbound pump.
        let inbound_rx = self.inner.inbound_rx.lock().take();
        if let Some(mut inbound_rx) = inbound_rx {
            let chat = self.clone();
            let pump = tokio::spawn(async move {
                while let Some(inbound) = inbound_rx.recv().await {
                    chat.handle_inbound(inbound).await;
                }
            });
            self.inner.tasks.lock().push(pump);
        }

        // Presence loop: announce ourselves, evict silent peers.
        let chat = self.clone();
        let presence = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PRESENCE_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(err) = chat.broadcast_presence().await {
                    debug!(%err, "presence broadcast failed");
                }
                chat.inner.peers.evict_stale(Instant::now());
            }
        });
        self.inner.tasks.lock().push(presence);

        info!(
            address = self.inner.config.address,
            nickname = %self.inner.config.nickname,
            "mesh chat started"
        );
        Ok(())
    }

    /// Take the node offline and quiesce the radio.
    pub async fn stop(&self) -> Result<(), MeshError> {
        {
            let mut running = self.inner.running.write();
            if !*running {
                return Err(MeshError::NotRunning);
            }
            *running = false;
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.network.stop().await;
        info!("mesh chat stopped");
        Ok(())
    }

    /// Send a message to everyone in range of the flood.
    pub async fn send_group_message(
        &self,
        content: &str,
        urgent: bool,
    ) -> Result<ChatMessage, MeshError> {
        let message_type = if urgent {
            MessageType::UrgentBroadcast
        } else {
            MessageType::ChatBroadcast
        };
        self.send_chat(BROADCAST_ADDR, None, content, message_type, urgent)
            .await
    }

    /// Send a message to one node; delivery is acknowledged end-to-end.
    pub async fn send_direct_message(
        &self,
        recipient: u16,
        content: &str,
        urgent: bool,
    ) -> Result<ChatMessage, MeshError> {
        let message_type = if urgent {
            MessageType::UrgentUnicast
        } else {
            MessageType::ChatUnicast
        };
        self.send_chat(recipient, Some(recipient), content, message_type, urgent)
            .await
    }

    async fn send_chat(
        &self,
        dst: u16,
        recipient: Option<u16>,
        content: &str,
        message_type: MessageType,
        urgent: bool,
    ) -> Result<ChatMessage, MeshError> {
        if !self.is_running() {
            return Err(MeshError::NotRunning);
        }
        if content.len() > MAX_CONTENT_SIZE {
            return Err(CodecError::ContentTooLarge {
                actual: content.len(),
                cap: MAX_CONTENT_SIZE,
            }
            .into());
        }

        let sequence_number = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
        let wire = MeshMessage {
            sender: self.inner.config.address,
            sender_nickname: self.inner.config.nickname.clone(),
            sequence_number,
            message_type: message_type.as_byte(),
            content: content.to_string(),
            timestamp: message::types::now_ms(),
            ttl: MAX_TTL,
            target: dst,
        };
        let encoded = message::encode(&wire)?;
        message::ensure_fits(encoded.len(), MAX_GATT_MESSAGE_SIZE)?;

        let record = ChatMessage::outgoing(
            self.inner.config.address,
            self.inner.config.nickname.clone(),
            recipient,
            content.to_string(),
            urgent,
        );
        self.inner.store.save(&record).await?;

        let handle = self.inner.network.send(dst, message_type, &encoded).await?;

        if message_type.expects_ack() {
            let network_id = handle.message_id;
            self.inner.pending_chats.lock().insert(network_id, record.id);

            // Detached: the handle always resolves (ack, timeout, retries
            // exhausted, or cancellation at shutdown), so nothing needs to
            // join this.
            let chat = self.clone();
            tokio::spawn(async move {
                if let Err(err) = handle.wait().await {
                    chat.inner.pending_chats.lock().remove(&network_id);
                    warn!(%err, "direct message not delivered");
                }
            });
        }

        Ok(record)
    }

    /// Recently visible peers, strongest signal first.
    pub fn peers(&self) -> Vec<Peer> {
        self.inner.peers.visible(Instant::now())
    }

    /// Chat history, newest last.
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, MeshError> {
        Ok(self.inner.store.recent(limit).await?)
    }

    /// Scan for unprovisioned devices.
    pub async fn discover_unprovisioned(&self) -> Result<Vec<UnprovisionedNode>, MeshError> {
        Ok(self.inner.provisioner.discover_nodes().await?)
    }

    /// Run the provisioning handshake against one device. Returns the
    /// address the device joined under.
    pub async fn provision_device(
        &self,
        client: &dyn GattClient,
        device_id: &str,
    ) -> Result<u16, MeshError> {
        match self.inner.provisioner.provision(client, device_id).await {
            Ok(result) => {
                self.notify(|delegate| {
                    delegate.provisioning_event(device_id, ProvisioningState::Complete)
                });
                Ok(result.address)
            }
            Err(err) => {
                self.notify(|delegate| {
                    delegate.provisioning_event(device_id, ProvisioningState::Failed)
                });
                Err(err.into())
            }
        }
    }

    async fn broadcast_presence(&self) -> Result<(), MeshError> {
        for message_type in [MessageType::Presence, MessageType::NicknameBroadcast] {
            let sequence_number = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
            let wire = MeshMessage {
                sender: self.inner.config.address,
                sender_nickname: self.inner.config.nickname.clone(),
                sequence_number,
                message_type: message_type.as_byte(),
                content: self.inner.config.nickname.clone(),
                timestamp: message::types::now_ms(),
                ttl: MAX_TTL,
                target: BROADCAST_ADDR,
            };
            let encoded = message::encode(&wire)?;
            self.inner
                .network
                .send(BROADCAST_ADDR, message_type, &encoded)
                .await?;
        }
        Ok(())
    }

    async fn handle_inbound(&self, inbound: InboundMessage) {
        // Our own frames can bounce back off a neighbour; nothing we
        // originated is incoming traffic.
        if inbound.src == self.inner.config.address {
            return;
        }

        match inbound.message_type {
            MessageType::Chat
            | MessageType::ChatBroadcast
            | MessageType::ChatUnicast
            | MessageType::UrgentBroadcast
            | MessageType::UrgentUnicast => self.handle_chat(inbound).await,
            MessageType::Ack | MessageType::Acknowledgement => {
                self.handle_acknowledgement(inbound).await
            }
            MessageType::Presence | MessageType::NicknameBroadcast => {
                self.handle_presence(inbound)
            }
            MessageType::Request
            | MessageType::ProvisioningRequest
            | MessageType::ProvisioningResponse => {
                debug!(message_type = ?inbound.message_type, "ignoring control frame");
            }
        }
    }

    async fn handle_chat(&self, inbound: InboundMessage) {
        let wire = match message::decode(&inbound.payload) {
            Ok(wire) => wire,
            Err(err) => {
                warn!(src = inbound.src, %err, "undecodable chat payload");
                return;
            }
        };

        if !self.inner.seen.lock().insert(wire.sender, wire.sequence_number) {
            debug!(
                sender = wire.sender,
                sequence = wire.sequence_number,
                "suppressing replayed chat"
            );
            return;
        }

        self.inner.peers.upsert(
            wire.sender,
            &inbound.device_id,
            &wire.sender_nickname,
            inbound.rssi,
            Instant::now(),
        );

        let urgent = matches!(
            inbound.message_type,
            MessageType::UrgentUnicast | MessageType::UrgentBroadcast
        );
        let record = ChatMessage::incoming(&wire, urgent);
        if let Err(err) = self.inner.store.save(&record).await {
            warn!(%err, "failed to store incoming message");
        }
        self.notify(|delegate| delegate.message_received(&record));

        // End-to-end ack for messages addressed to us alone.
        if inbound.message_type.is_unicast_chat() && inbound.dst == self.inner.config.address {
            let ack_payload = inbound.message_id.to_be_bytes();
            match self
                .inner
                .network
                .send(inbound.src, MessageType::Acknowledgement, &ack_payload)
                .await
            {
                Ok(handle) => drop(handle),
                Err(err) => warn!(dst = inbound.src, %err, "failed to send acknowledgement"),
            }
        }
    }

    async fn handle_acknowledgement(&self, inbound: InboundMessage) {
        let bytes: [u8; 8] = match inbound.payload.as_slice().try_into() {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(
                    src = inbound.src,
                    len = inbound.payload.len(),
                    "malformed acknowledgement payload"
                );
                return;
            }
        };
        let acked_id = u64::from_be_bytes(bytes);

        self.inner.network.complete_message_send(acked_id);

        let chat_id = self.inner.pending_chats.lock().remove(&acked_id);
        if let Some(chat_id) = chat_id {
            if let Err(err) = self.inner.store.mark_delivered(chat_id).await {
                warn!(%err, "failed to mark message delivered");
            }
            self.notify(|delegate| delegate.message_delivered(chat_id));
        }
    }

    fn handle_presence(&self, inbound: InboundMessage) {
        let nickname = message::decode(&inbound.payload)
            .map(|wire| wire.sender_nickname)
            .unwrap_or_default();
        self.inner.peers.upsert(
            inbound.src,
            &inbound.device_id,
            &nickname,
            inbound.rssi,
            Instant::now(),
        );
        if let Some(peer) = self.inner.peers.get(inbound.src) {
            self.notify(|delegate| delegate.peer_updated(&peer));
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn MeshDelegate)) {
        if let Some(delegate) = self.inner.delegate.read().as_ref() {
            f(delegate.as_ref());
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}
