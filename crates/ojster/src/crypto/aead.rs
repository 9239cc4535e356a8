//! AES-256-GCM encryption and decryption of a single byte buffer.
//!
//! The blob layout is `nonce[12] || ciphertext || tag[16]` with no associated
//! data. A fresh random nonce is drawn for every call.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand_core::CryptoRngCore;
use thiserror::Error;

/// Byte length of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// Byte length of the GCM nonce prefixed to every blob.
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended by the cipher.
pub const TAG_LEN: usize = 16;

/// Errors produced by the AEAD layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AeadError {
    #[error("invalid key size: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("ciphertext blob too short: {0} bytes")]
    BlobTooShort(usize),

    /// Covers both corruption and tampering; the two are not distinguished.
    #[error("message authentication failed")]
    AuthenticationFailed,

    #[error("random source unavailable")]
    RandomSourceFailed,

    #[error("aead encryption failed")]
    EncryptionFailed,
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`AeadError::InvalidKeySize`] if `key` is not [`KEY_LEN`] bytes, and
/// [`AeadError::RandomSourceFailed`] if no nonce could be drawn.
pub fn encrypt(
    key: &[u8],
    plaintext: &[u8],
    rng: &mut impl CryptoRngCore,
) -> Result<Vec<u8>, AeadError> {
    let cipher = build_cipher(key)?;

    let mut nonce = [0u8; NONCE_LEN];
    rng.try_fill_bytes(&mut nonce)
        .map_err(|_| AeadError::RandomSourceFailed)?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| AeadError::EncryptionFailed)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// - [`AeadError::InvalidKeySize`] if `key` is not [`KEY_LEN`] bytes.
/// - [`AeadError::BlobTooShort`] if the blob cannot hold a nonce.
/// - [`AeadError::AuthenticationFailed`] if the tag does not verify.
pub fn decrypt(key: &[u8], blob: &[u8]) -> Result<Vec<u8>, AeadError> {
    let cipher = build_cipher(key)?;

    if blob.len() < NONCE_LEN {
        return Err(AeadError::BlobTooShort(blob.len()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AeadError::AuthenticationFailed)
}

fn build_cipher(key: &[u8]) -> Result<Aes256Gcm, AeadError> {
    if key.len() != KEY_LEN {
        return Err(AeadError::InvalidKeySize(key.len()));
    }
    Aes256Gcm::new_from_slice(key).map_err(|_| AeadError::InvalidKeySize(key.len()))
}
