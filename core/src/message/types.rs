// Chat message types — the literal point of this app

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::BROADCAST_ADDR;

/// Delivery status of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Message left this device
    Sent,
    /// Acknowledged by the recipient
    Delivered,
    /// No acknowledgement arrived in time
    Failed(String),
}

/// A chat message as the application sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message ID (UUID v4)
    pub id: Uuid,
    /// Short mesh address of the sender
    pub sender: u16,
    /// Nickname the sender was using at send time
    pub sender_nickname: String,
    /// Recipient address; `None` for group messages
    pub recipient: Option<u16>,
    /// UTF-8 message body
    pub content: String,
    /// Unix timestamp in milliseconds
    pub timestamp_ms: u64,
    /// Whether this message used the urgent types
    pub urgent: bool,
    /// Whether delivery has been acknowledged
    pub delivered: bool,
    /// Whether this message arrived from the mesh
    pub incoming: bool,
}

impl ChatMessage {
    /// Create an outgoing message record.
    pub fn outgoing(
        sender: u16,
        sender_nickname: String,
        recipient: Option<u16>,
        content: String,
        urgent: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            sender_nickname,
            recipient,
            content,
            timestamp_ms: now_ms(),
            urgent,
            delivered: false,
            incoming: false,
        }
    }

    /// Create a record for a message received from the mesh.
    pub fn incoming(wire: &MeshMessage, urgent: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: wire.sender,
            sender_nickname: wire.sender_nickname.clone(),
            recipient: (wire.target != BROADCAST_ADDR).then_some(wire.target),
            content: wire.content.clone(),
            timestamp_ms: wire.timestamp,
            urgent,
            delivered: true,
            incoming: true,
        }
    }
}

/// The wire form of a chat payload: serialized to JSON, then deflated,
/// then encrypted by the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshMessage {
    pub sender: u16,
    pub sender_nickname: String,
    pub sequence_number: u32,
    pub message_type: u8,
    pub content: String,
    pub timestamp: u64,
    pub ttl: u8,
    pub target: u16,
}

/// A nearby node as observed from presence traffic.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Platform device identifier from the scan result
    pub device_id: String,
    /// Mesh address
    pub address: u16,
    pub nickname: String,
    /// Most recent RSSI in dBm
    pub rssi: i16,
    pub last_seen: std::time::Instant,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_defaults() {
        let msg = ChatMessage::outgoing(1, "ember".into(), Some(2), "hi".into(), false);
        assert!(!msg.delivered);
        assert!(!msg.incoming);
        assert_eq!(msg.recipient, Some(2));
        assert!(msg.timestamp_ms > 0);
    }

    #[test]
    fn test_incoming_broadcast_has_no_recipient() {
        let wire = MeshMessage {
            sender: 3,
            sender_nickname: "peer".into(),
            sequence_number: 1,
            message_type: 0x12,
            content: "hello all".into(),
            timestamp: 1_000,
            ttl: 10,
            target: BROADCAST_ADDR,
        };
        let msg = ChatMessage::incoming(&wire, false);
        assert_eq!(msg.recipient, None);
        assert!(msg.incoming);
        assert_eq!(msg.content, "hello all");
    }

    #[test]
    fn test_incoming_unicast_keeps_target() {
        let wire = MeshMessage {
            sender: 3,
            sender_nickname: "peer".into(),
            sequence_number: 2,
            message_type: 0x11,
            content: "just you".into(),
            timestamp: 1_000,
            ttl: 10,
            target: 7,
        };
        let msg = ChatMessage::incoming(&wire, true);
        assert_eq!(msg.recipient, Some(7));
        assert!(msg.urgent);
    }
}
