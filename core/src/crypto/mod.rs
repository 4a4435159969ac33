//! Security layer — key material and payload encryption
//!
//! Holds the keyring (network, app, privacy, device keys), derives the key
//! set from a master secret, and encrypts/decrypts mesh payloads. Missing
//! keys fail closed: no key, no traffic.

pub mod cipher;
pub mod kdf;

pub use kdf::{derive_keys, DerivedKeys};

use parking_lot::RwLock;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-128 key length in bytes.
pub const KEY_SIZE: usize = 16;

/// CBC initialization vector length in bytes.
pub const IV_SIZE: usize = 16;

/// Errors from the security layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("master secret must not be empty")]
    EmptyMasterSecret,

    #[error("key derivation failed")]
    DerivationFailed,

    #[error("no {0:?} key installed")]
    KeyUnavailable(KeyType),

    #[error("key must be {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("ciphertext too short: {actual} bytes, need at least {required}")]
    CiphertextTooShort { actual: usize, required: usize },

    #[error("decryption failed")]
    DecryptFailed,
}

/// Which key a caller wants to use or replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Network,
    App,
    Privacy,
    Device,
}

#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct Keyring {
    network: Option<[u8; KEY_SIZE]>,
    app: Option<[u8; KEY_SIZE]>,
    privacy: Option<[u8; KEY_SIZE]>,
    device: Option<[u8; KEY_SIZE]>,
}

impl Keyring {
    fn slot(&self, key_type: KeyType) -> &Option<[u8; KEY_SIZE]> {
        match key_type {
            KeyType::Network => &self.network,
            KeyType::App => &self.app,
            KeyType::Privacy => &self.privacy,
            KeyType::Device => &self.device,
        }
    }

    fn slot_mut(&mut self, key_type: KeyType) -> &mut Option<[u8; KEY_SIZE]> {
        match key_type {
            KeyType::Network => &mut self.network,
            KeyType::App => &mut self.app,
            KeyType::Privacy => &mut self.privacy,
            KeyType::Device => &mut self.device,
        }
    }
}

/// Thread-safe keyring plus encrypt/decrypt entry points.
#[derive(Default)]
pub struct SecurityLayer {
    keys: RwLock<Keyring>,
}

impl SecurityLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the network, app and privacy keys from `master` and install
    /// them, replacing any previous set.
    pub fn install_derived(&self, master: &[u8]) -> Result<(), SecurityError> {
        let derived = derive_keys(master)?;
        let mut keys = self.keys.write();
        keys.network = Some(derived.network);
        keys.app = Some(derived.app);
        keys.privacy = Some(derived.privacy);
        Ok(())
    }

    /// Install or replace a single key, as delivered by provisioning.
    pub fn update_key(&self, key_type: KeyType, bytes: &[u8]) -> Result<(), SecurityError> {
        if bytes.len() != KEY_SIZE {
            return Err(SecurityError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        *self.keys.write().slot_mut(key_type) = Some(key);
        Ok(())
    }

    pub fn has_key(&self, key_type: KeyType) -> bool {
        self.keys.read().slot(key_type).is_some()
    }

    /// Encrypt under the named key. Fails closed when the key is absent.
    pub fn encrypt(&self, key_type: KeyType, plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let keys = self.keys.read();
        let key = keys
            .slot(key_type)
            .as_ref()
            .ok_or(SecurityError::KeyUnavailable(key_type))?;
        Ok(cipher::encrypt(key, plaintext))
    }

    /// Decrypt `IV || ciphertext` under the named key.
    pub fn decrypt(&self, key_type: KeyType, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let keys = self.keys.read();
        let key = keys
            .slot(key_type)
            .as_ref()
            .ok_or(SecurityError::KeyUnavailable(key_type))?;
        cipher::decrypt(key, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_without_key_fails_closed() {
        let security = SecurityLayer::new();
        assert_eq!(
            security.encrypt(KeyType::App, b"data"),
            Err(SecurityError::KeyUnavailable(KeyType::App))
        );
        assert_eq!(
            security.decrypt(KeyType::App, b"data"),
            Err(SecurityError::KeyUnavailable(KeyType::App))
        );
    }

    #[test]
    fn test_derive_then_roundtrip() {
        let security = SecurityLayer::new();
        security.install_derived(b"group secret").unwrap();

        for key_type in [KeyType::Network, KeyType::App, KeyType::Privacy] {
            let wire = security.encrypt(key_type, b"hello mesh").unwrap();
            assert_eq!(security.decrypt(key_type, &wire).unwrap(), b"hello mesh");
        }
        // The device key only arrives via provisioning.
        assert!(!security.has_key(KeyType::Device));
    }

    #[test]
    fn test_update_key_validates_length() {
        let security = SecurityLayer::new();
        assert_eq!(
            security.update_key(KeyType::Device, &[0u8; 8]),
            Err(SecurityError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: 8
            })
        );
        security.update_key(KeyType::Device, &[7u8; KEY_SIZE]).unwrap();
        assert!(security.has_key(KeyType::Device));
    }

    #[test]
    fn test_two_nodes_with_same_master_interoperate() {
        let alice = SecurityLayer::new();
        let bob = SecurityLayer::new();
        alice.install_derived(b"shared").unwrap();
        bob.install_derived(b"shared").unwrap();

        let wire = alice.encrypt(KeyType::App, b"over the air").unwrap();
        assert_eq!(bob.decrypt(KeyType::App, &wire).unwrap(), b"over the air");
    }

    #[test]
    fn test_mismatched_masters_do_not_interoperate() {
        let alice = SecurityLayer::new();
        let bob = SecurityLayer::new();
        alice.install_derived(b"secret a").unwrap();
        bob.install_derived(b"secret b").unwrap();

        let wire = alice.encrypt(KeyType::App, b"over the air").unwrap();
        match bob.decrypt(KeyType::App, &wire) {
            Err(_) => {}
            Ok(recovered) => assert_ne!(recovered, b"over the air"),
        }
    }
}
