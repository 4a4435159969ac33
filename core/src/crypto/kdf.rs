//! Key derivation
//!
//! The network, application and privacy keys are all derived from one shared
//! master secret with HKDF-SHA256. Each key gets its own info label so the
//! outputs are domain-separated; the salt is left at the RFC 5869 default.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{SecurityError, KEY_SIZE};

const NETWORK_KEY_LABEL: &[u8] = b"nk";
const APP_KEY_LABEL: &[u8] = b"ak";
const PRIVACY_KEY_LABEL: &[u8] = b"pk";

/// The three keys derived from a master secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKeys {
    pub network: [u8; KEY_SIZE],
    pub app: [u8; KEY_SIZE],
    pub privacy: [u8; KEY_SIZE],
}

/// Expand `master` into the network, app and privacy keys.
pub fn derive_keys(master: &[u8]) -> Result<DerivedKeys, SecurityError> {
    if master.is_empty() {
        return Err(SecurityError::EmptyMasterSecret);
    }

    let hkdf = Hkdf::<Sha256>::new(None, master);
    let mut keys = DerivedKeys {
        network: [0u8; KEY_SIZE],
        app: [0u8; KEY_SIZE],
        privacy: [0u8; KEY_SIZE],
    };

    hkdf.expand(NETWORK_KEY_LABEL, &mut keys.network)
        .map_err(|_| SecurityError::DerivationFailed)?;
    hkdf.expand(APP_KEY_LABEL, &mut keys.app)
        .map_err(|_| SecurityError::DerivationFailed)?;
    hkdf.expand(PRIVACY_KEY_LABEL, &mut keys.privacy)
        .map_err(|_| SecurityError::DerivationFailed)?;

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_keys(b"shared secret").unwrap();
        let b = derive_keys(b"shared secret").unwrap();
        assert_eq!(a.network, b.network);
        assert_eq!(a.app, b.app);
        assert_eq!(a.privacy, b.privacy);
    }

    #[test]
    fn test_keys_are_domain_separated() {
        let keys = derive_keys(b"shared secret").unwrap();
        assert_ne!(keys.network, keys.app);
        assert_ne!(keys.app, keys.privacy);
        assert_ne!(keys.network, keys.privacy);
    }

    #[test]
    fn test_different_masters_give_different_keys() {
        let a = derive_keys(b"secret one").unwrap();
        let b = derive_keys(b"secret two").unwrap();
        assert_ne!(a.network, b.network);
    }

    #[test]
    fn test_empty_master_rejected() {
        assert!(matches!(
            derive_keys(b""),
            Err(SecurityError::EmptyMasterSecret)
        ));
    }
}
