//! AES-256-GCM encryption of record payloads before they leave the process.
//!
//! Wire format: nonce (12 bytes) || ciphertext (includes 16-byte GCM tag).
//! The blob is self-describing; no IV is stored anywhere else.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::Rng;
use thiserror::Error;

/// AES-256 key length in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("CryptoError: invalid key size ({0} bytes, expected 32)")]
    InvalidKeySize(usize),

    #[error("CryptoError: ciphertext too short ({0} bytes)")]
    Truncated(usize),

    /// Tag verification failed: wrong key or tampered ciphertext.
    #[error("CryptoError: integrity check failed")]
    Integrity,
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeySize(key.len()))
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce_bytes: [u8; NONCE_SIZE] = rand::rng().random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Integrity)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a `nonce || ciphertext` blob. Never returns partial plaintext.
pub fn decrypt(blob: &[u8], key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    if blob.len() < NONCE_SIZE {
        return Err(CryptoError::Truncated(blob.len()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Integrity)
}

/// Generate a random 256-bit key.
pub fn generate_key() -> [u8; KEY_SIZE] {
    rand::rng().random()
}
