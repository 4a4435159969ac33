//! Mesh network layer
//!
//! Floods PDUs through the mesh: an outgoing payload is encrypted, cut into
//! transport segments, and every segment goes on air inside its own PDU
//! sharing the message id and sequence number. Incoming PDUs are
//! deduplicated per frame, their segments reassembled when addressed here,
//! and relayed body-verbatim with only the TTL decremented otherwise.
//!
//! Each send returns a [`SendHandle`] backed by a oneshot channel, so every
//! send sees exactly one terminal event: acknowledged, timed out, retried
//! out, or cancelled by shutdown.

pub mod dedup;
pub mod duty;
pub mod pdu;

pub use dedup::{DedupCache, DEDUP_CAPACITY, DEDUP_CLEANUP_INTERVAL, DEDUP_ENTRY_TTL};
pub use duty::{DutyCycle, HIGH_POWER_WINDOW, LOW_POWER_WINDOW, SCAN_RETRY_DELAY};
pub use pdu::{FormatError, MeshPdu, MessageType, BROADCAST_ADDR, MAX_TTL};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::crypto::{KeyType, SecurityError, SecurityLayer};
use crate::radio::{RadioError, RadioTransport, ScanResult, MANUFACTURER_ID};
use crate::transport::{self, Reassembler, RetransmitQueue, Segment, TransportError};

/// A send with no acknowledgement after this long is failed.
pub const PENDING_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// How often pending sends and reassembly buffers are swept.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from the network layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Radio(#[from] RadioError),

    #[error("send {message_id:#x} not acknowledged in time")]
    SendTimeout { message_id: u64 },

    #[error("send {message_id:#x} exhausted its retransmissions")]
    RetriesExhausted { message_id: u64 },

    #[error("send was cancelled before completing")]
    Cancelled,
}

/// A decrypted PDU delivered to the application layer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: u64,
    pub src: u16,
    pub dst: u16,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
    pub rssi: i16,
    pub device_id: String,
}

/// Completion handle for one send.
pub struct SendHandle {
    pub message_id: u64,
    completion: oneshot::Receiver<Result<(), NetworkError>>,
}

impl SendHandle {
    /// Wait for the terminal event of this send.
    pub async fn wait(self) -> Result<(), NetworkError> {
        self.completion.await.map_err(|_| NetworkError::Cancelled)?
    }
}

struct PendingSend {
    responder: oneshot::Sender<Result<(), NetworkError>>,
    created: Instant,
}

/// The flooding network layer for one node.
pub struct MeshNetwork {
    own_address: u16,
    radio: Arc<dyn RadioTransport>,
    security: Arc<SecurityLayer>,
    reassembler: Mutex<Reassembler>,
    retransmit: Mutex<RetransmitQueue>,
    dedup: Mutex<DedupCache>,
    pending: Mutex<HashMap<u64, PendingSend>>,
    // In-flight multi-segment sends that can still be acknowledged.
    tracked_seqs: Mutex<HashMap<u64, u16>>,
    next_seq: AtomicU16,
    inbound_tx: mpsc::Sender<InboundMessage>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MeshNetwork {
    pub fn new(
        own_address: u16,
        radio: Arc<dyn RadioTransport>,
        security: Arc<SecurityLayer>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        // Seed from the clock so sequence spaces rarely collide across
        // restarts.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u16;

        Self {
            own_address,
            radio,
            security,
            reassembler: Mutex::new(Reassembler::new()),
            retransmit: Mutex::new(RetransmitQueue::new()),
            dedup: Mutex::new(DedupCache::new()),
            pending: Mutex::new(HashMap::new()),
            tracked_seqs: Mutex::new(HashMap::new()),
            next_seq: AtomicU16::new(seed),
            inbound_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn own_address(&self) -> u16 {
        self.own_address
    }

    fn allocate_seq(&self) -> u16 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Encrypt, frame and advertise `payload` toward `dst`. The ciphertext
    /// is segmented under one sequence number and each segment ships in its
    /// own PDU carrying the shared message id; each frame is also cached
    /// against dedup so an echoed copy never loops back into us.
    ///
    /// Types that expect an acknowledgement resolve their handle when
    /// [`complete_message_send`](Self::complete_message_send) fires or the
    /// pending sweep times them out; every other type resolves immediately
    /// after the frames hit the radio.
    pub async fn send(
        &self,
        dst: u16,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<SendHandle, NetworkError> {
        let ciphertext = self.security.encrypt(KeyType::App, payload)?;
        let message_id = rand::random::<u64>();
        let seq_num = self.allocate_seq();
        let segments = transport::segment(seq_num, &ciphertext)?;

        let mut frames = Vec::with_capacity(segments.len());
        {
            let mut dedup = self.dedup.lock();
            let now = Instant::now();
            for segment in &segments {
                dedup.insert(message_id, segment.segment_index, now);
                let pdu = MeshPdu::new(
                    message_id,
                    self.own_address,
                    dst,
                    MAX_TTL,
                    message_type,
                    segment.to_bytes(),
                );
                frames.push(pdu.to_bytes());
            }
        }

        let (responder, completion) = oneshot::channel();
        let fire_and_forget = if message_type.expects_ack() {
            self.pending.lock().insert(
                message_id,
                PendingSend {
                    responder,
                    created: Instant::now(),
                },
            );
            None
        } else {
            Some(responder)
        };

        if frames.len() > 1 {
            self.retransmit
                .lock()
                .record(seq_num, frames.clone(), Instant::now());
            self.tracked_seqs.lock().insert(message_id, seq_num);
        }

        for frame in &frames {
            if let Err(err) = self.radio.start_advertising(frame).await {
                self.fail_send(message_id, NetworkError::Cancelled);
                self.retransmit.lock().acknowledge(seq_num);
                return Err(err.into());
            }
        }

        if let Some(responder) = fire_and_forget {
            // Nothing will ever acknowledge this; resolve now.
            let _ = responder.send(Ok(()));
        }

        debug!(
            message_id = format_args!("{message_id:#x}"),
            dst,
            seq_num,
            segments = frames.len(),
            ?message_type,
            "sent PDU"
        );
        Ok(SendHandle {
            message_id,
            completion,
        })
    }

    /// Resolve the pending send for `message_id` as acknowledged. Returns
    /// whether a send was still waiting.
    pub fn complete_message_send(&self, message_id: u64) -> bool {
        if let Some(seq_num) = self.tracked_seqs.lock().remove(&message_id) {
            self.retransmit.lock().acknowledge(seq_num);
        }
        match self.pending.lock().remove(&message_id) {
            Some(pending) => {
                let _ = pending.responder.send(Ok(()));
                true
            }
            None => false,
        }
    }

    fn fail_send(&self, message_id: u64, err: NetworkError) {
        self.tracked_seqs.lock().remove(&message_id);
        if let Some(pending) = self.pending.lock().remove(&message_id) {
            let _ = pending.responder.send(Err(err));
        }
    }

    /// One observed advertisement from the radio.
    pub async fn handle_scan_result(&self, result: ScanResult) {
        if result.manufacturer_id != MANUFACTURER_ID {
            return;
        }

        let pdu = match MeshPdu::from_bytes(&result.payload) {
            Ok(pdu) => pdu,
            Err(err) => {
                trace!(%err, "ignoring undecodable frame");
                return;
            }
        };

        self.handle_incoming_pdu(pdu, result.rssi, &result.device_id)
            .await;
    }

    /// Dedup, reassemble, deliver, relay.
    async fn handle_incoming_pdu(&self, pdu: MeshPdu, rssi: i16, device_id: &str) {
        let segment = match Segment::from_bytes(&pdu.payload) {
            Ok(segment) => segment,
            Err(err) => {
                debug!(%err, "dropping PDU with malformed segment body");
                return;
            }
        };

        if !self
            .dedup
            .lock()
            .insert(pdu.message_id, segment.segment_index, Instant::now())
        {
            trace!(
                message_id = format_args!("{:#x}", pdu.message_id),
                segment_index = segment.segment_index,
                "duplicate frame"
            );
            return;
        }

        if pdu.ttl == 0 {
            debug!(
                message_id = format_args!("{:#x}", pdu.message_id),
                "TTL exhausted"
            );
            return;
        }

        if pdu.addressed_to(self.own_address) {
            let assembled = match self
                .reassembler
                .lock()
                .add_segment(pdu.src, segment, Instant::now())
            {
                Ok(assembled) => assembled,
                Err(err) => {
                    debug!(%err, "segment rejected");
                    None
                }
            };

            if let Some(ciphertext) = assembled {
                match self.security.decrypt(KeyType::App, &ciphertext) {
                    Ok(plaintext) => {
                        let inbound = InboundMessage {
                            message_id: pdu.message_id,
                            src: pdu.src,
                            dst: pdu.dst,
                            message_type: pdu.message_type,
                            payload: plaintext,
                            rssi,
                            device_id: device_id.to_string(),
                        };
                        if self.inbound_tx.send(inbound).await.is_err() {
                            warn!("inbound channel closed, dropping delivery");
                        }
                    }
                    Err(err) => warn!(src = pdu.src, %err, "failed to decrypt local delivery"),
                }
            }
        }

        self.maybe_relay(pdu).await;
    }

    /// Forward a frame onward with only the TTL touched. The body stays
    /// byte-identical, so segments keep their original sequence number and
    /// index across hops. Never relays our own frames or frames that
    /// terminated here. The caller has already dropped TTL-zero arrivals,
    /// so the decremented TTL may legally reach 0 on air.
    async fn maybe_relay(&self, pdu: MeshPdu) {
        if pdu.src == self.own_address || pdu.dst == self.own_address {
            return;
        }

        let mut relayed = pdu;
        relayed.ttl -= 1;
        let message_id = relayed.message_id;
        if let Err(err) = self.radio.start_advertising(&relayed.to_bytes()).await {
            warn!(
                message_id = format_args!("{message_id:#x}"),
                %err,
                "relay failed"
            );
        } else {
            trace!(
                message_id = format_args!("{message_id:#x}"),
                ttl = relayed.ttl,
                "relayed PDU"
            );
        }
    }

    /// Fail pending sends that outlived [`PENDING_SEND_TIMEOUT`].
    pub fn expire_pending(&self, now: Instant) {
        let expired: Vec<u64> = self
            .pending
            .lock()
            .iter()
            .filter(|(_, p)| now.duration_since(p.created) >= PENDING_SEND_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for message_id in expired {
            warn!(
                message_id = format_args!("{message_id:#x}"),
                "pending send timed out"
            );
            self.fail_send(message_id, NetworkError::SendTimeout { message_id });
        }
    }

    /// One retransmission poll: re-advertise due frames, fail retried-out
    /// sends.
    pub async fn retransmit_tick(&self, now: Instant) {
        let due = self.retransmit.lock().due(now);

        for (seq_num, frames) in due.resend {
            trace!(seq_num, "retransmitting");
            for frame in frames {
                if let Err(err) = self.radio.start_advertising(&frame).await {
                    warn!(seq_num, %err, "retransmission failed");
                    break;
                }
            }
        }

        for seq_num in due.expired {
            let message_id = self
                .tracked_seqs
                .lock()
                .iter()
                .find(|(_, seq)| **seq == seq_num)
                .map(|(id, _)| *id);
            if let Some(message_id) = message_id {
                self.fail_send(message_id, NetworkError::RetriesExhausted { message_id });
            }
        }
    }

    /// Start scanning and the background maintenance tasks.
    pub async fn start(self: Arc<Self>) -> Result<(), NetworkError> {
        let (scan_tx, mut scan_rx) = mpsc::channel::<ScanResult>(256);

        // Scan starter with retry, then duty cycling.
        let network = Arc::clone(&self);
        let scan_task = tokio::spawn(async move {
            loop {
                match network.radio.start_scanning(scan_tx.clone()).await {
                    Ok(()) => break,
                    Err(err) => {
                        warn!(%err, "scan start failed, retrying");
                        tokio::time::sleep(SCAN_RETRY_DELAY).await;
                    }
                }
            }

            let mut cycle = DutyCycle::new();
            loop {
                tokio::time::sleep(cycle.window()).await;
                let mode = cycle.advance();
                if let Err(err) = network.radio.set_scan_mode(mode).await {
                    warn!(%err, ?mode, "failed to switch scan mode");
                }
            }
        });

        // Inbound pump.
        let network = Arc::clone(&self);
        let pump_task = tokio::spawn(async move {
            while let Some(result) = scan_rx.recv().await {
                network.handle_scan_result(result).await;
            }
        });

        // Reassembly and pending-send sweep.
        let network = Arc::clone(&self);
        let sweep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                network.reassembler.lock().sweep(now);
                network.expire_pending(now);
            }
        });

        // Retransmission poll.
        let network = Arc::clone(&self);
        let retransmit_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(transport::RETRANSMIT_TICK);
            loop {
                ticker.tick().await;
                network.retransmit_tick(Instant::now()).await;
            }
        });

        // Dedup cleanup.
        let network = Arc::clone(&self);
        let dedup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(DEDUP_CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                network.dedup.lock().cleanup(Instant::now());
            }
        });

        self.tasks.lock().extend([
            scan_task,
            pump_task,
            sweep_task,
            retransmit_task,
            dedup_task,
        ]);
        Ok(())
    }

    /// Stop background tasks, fail anything still in flight and quiesce the
    /// radio. Pending senders see [`NetworkError::Cancelled`].
    pub async fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        let in_flight: Vec<u64> = self.pending.lock().keys().copied().collect();
        for message_id in in_flight {
            self.fail_send(message_id, NetworkError::Cancelled);
        }
        if let Err(err) = self.radio.stop_scanning().await {
            debug!(%err, "stop_scanning failed");
        }
        if let Err(err) = self.radio.stop_advertising().await {
            debug!(%err, "stop_advertising failed");
        }
    }
}
