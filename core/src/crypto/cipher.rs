//! Payload encryption
//!
//! AES-128-CBC with PKCS#7 padding. A fresh random IV is generated for every
//! encryption and prepended to the ciphertext, so the wire form is
//! `IV (16) || ciphertext`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use super::{SecurityError, IV_SIZE, KEY_SIZE};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Encrypt `plaintext` under `key`, returning `IV || ciphertext`.
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Vec<u8> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);

    let ciphertext =
        Aes128CbcEnc::new(key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt `IV || ciphertext` produced by [`encrypt`].
pub fn decrypt(key: &[u8; KEY_SIZE], data: &[u8]) -> Result<Vec<u8>, SecurityError> {
    if data.len() < IV_SIZE {
        return Err(SecurityError::CiphertextTooShort {
            actual: data.len(),
            required: IV_SIZE,
        });
    }

    let (iv, ciphertext) = data.split_at(IV_SIZE);
    let mut iv_arr = [0u8; IV_SIZE];
    iv_arr.copy_from_slice(iv);

    Aes128CbcDec::new(key.into(), &iv_arr.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| SecurityError::DecryptFailed)
}
