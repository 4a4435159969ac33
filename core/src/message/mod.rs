// Message module — chat types, wire codec and replay suppression

pub mod codec;
pub mod types;
pub mod window;

pub use codec::{decode, encode, ensure_fits, CodecError, MAX_CONTENT_SIZE, MAX_GATT_MESSAGE_SIZE};
pub use types::{ChatMessage, DeliveryStatus, MeshMessage, Peer};
pub use window::{SeenWindow, SEEN_WINDOW_SIZE};
