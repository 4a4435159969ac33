//! Mesh PDU wire format
//!
//! Every frame that crosses the mesh carries a fixed 14-byte big-endian
//! header followed by an opaque body, which in practice is one transport
//! segment of the encrypted payload. The header is hand-packed rather than
//! serde-derived so the on-air layout stays stable.

use thiserror::Error;

/// Broadcast destination address.
pub const BROADCAST_ADDR: u16 = 0xFFFF;

/// Maximum hop count for a freshly minted PDU.
pub const MAX_TTL: u8 = 10;

/// Errors produced by the PDU codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("PDU too short: {actual} bytes, need at least {required}")]
    TooShort { actual: usize, required: usize },

    #[error("unknown message type byte: {0:#04x}")]
    UnknownType(u8),
}

/// Closed set of mesh message types.
///
/// Unknown bytes are a decode error, never silently coerced, so a relay can
/// not launder a corrupt frame into a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Chat,
    Presence,
    Ack,
    Request,
    ChatUnicast,
    ChatBroadcast,
    NicknameBroadcast,
    ProvisioningRequest,
    ProvisioningResponse,
    Acknowledgement,
    UrgentUnicast,
    UrgentBroadcast,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        match self {
            MessageType::Chat => 0x01,
            MessageType::Presence => 0x02,
            MessageType::Ack => 0x03,
            MessageType::Request => 0x04,
            MessageType::ChatUnicast => 0x11,
            MessageType::ChatBroadcast => 0x12,
            MessageType::NicknameBroadcast => 0x13,
            MessageType::ProvisioningRequest => 0x14,
            MessageType::ProvisioningResponse => 0x15,
            MessageType::Acknowledgement => 0x16,
            MessageType::UrgentUnicast => 0x81,
            MessageType::UrgentBroadcast => 0x82,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, FormatError> {
        match byte {
            0x01 => Ok(MessageType::Chat),
            0x02 => Ok(MessageType::Presence),
            0x03 => Ok(MessageType::Ack),
            0x04 => Ok(MessageType::Request),
            0x11 => Ok(MessageType::ChatUnicast),
            0x12 => Ok(MessageType::ChatBroadcast),
            0x13 => Ok(MessageType::NicknameBroadcast),
            0x14 => Ok(MessageType::ProvisioningRequest),
            0x15 => Ok(MessageType::ProvisioningResponse),
            0x16 => Ok(MessageType::Acknowledgement),
            0x81 => Ok(MessageType::UrgentUnicast),
            0x82 => Ok(MessageType::UrgentBroadcast),
            other => Err(FormatError::UnknownType(other)),
        }
    }

    /// Whether a sender of this type waits for an application-level
    /// acknowledgement before considering the send complete.
    pub fn expects_ack(self) -> bool {
        matches!(self, MessageType::ChatUnicast | MessageType::UrgentUnicast)
    }

    /// Whether the payload is addressed to a single node.
    pub fn is_unicast_chat(self) -> bool {
        matches!(self, MessageType::ChatUnicast | MessageType::UrgentUnicast)
    }
}

/// A single mesh protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPdu {
    pub message_id: u64,
    pub src: u16,
    pub dst: u16,
    pub ttl: u8,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

impl MeshPdu {
    /// Size of the packed header in bytes.
    pub const HEADER_SIZE: usize = 14;

    pub fn new(
        message_id: u64,
        src: u16,
        dst: u16,
        ttl: u8,
        message_type: MessageType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id,
            src,
            dst,
            ttl,
            message_type,
            payload,
        }
    }

    /// True when `addr` should accept this PDU for local delivery.
    pub fn addressed_to(&self, addr: u16) -> bool {
        self.dst == addr || self.dst == BROADCAST_ADDR
    }

    /// Serialize header and payload into wire bytes (big-endian header).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.message_id.to_be_bytes());
        bytes.extend_from_slice(&self.src.to_be_bytes());
        bytes.extend_from_slice(&self.dst.to_be_bytes());
        bytes.push(self.ttl);
        bytes.push(self.message_type.as_byte());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse wire bytes; everything after the header is the payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(FormatError::TooShort {
                actual: bytes.len(),
                required: Self::HEADER_SIZE,
            });
        }

        let message_id = u64::from_be_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let src = u16::from_be_bytes([bytes[8], bytes[9]]);
        let dst = u16::from_be_bytes([bytes[10], bytes[11]]);
        let ttl = bytes[12];
        let message_type = MessageType::from_byte(bytes[13])?;

        Ok(Self {
            message_id,
            src,
            dst,
            ttl,
            message_type,
            payload: bytes[Self::HEADER_SIZE..].to_vec(),
        })
    }
}
