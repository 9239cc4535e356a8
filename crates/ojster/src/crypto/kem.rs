//! ML-KEM-768 key encapsulation.
//!
//! Key material on disk:
//!   private = d[32] || z[32]   (64-byte seed, expanded on load)
//!   public  = ek[1184]         (encapsulation key encoding)
//!
//! KEM ciphertext: 1088 bytes. Shared secret: 32 bytes.
//!
//! Decapsulation uses implicit rejection: a ciphertext produced under another
//! key yields an unrelated shared secret rather than an error, so "wrong key"
//! and "corrupted ciphertext" surface identically at the AEAD layer.

use std::fmt;

use ml_kem::{
    kem::{Decapsulate, Encapsulate},
    Ciphertext, EncodedSizeUser, KemCore, MlKem768, MlKem768Params, B32,
};
use rand_core::CryptoRngCore;
use thiserror::Error;
use zeroize::Zeroizing;

type Ek = ml_kem::kem::EncapsulationKey<MlKem768Params>;
type Dk = ml_kem::kem::DecapsulationKey<MlKem768Params>;

/// ML-KEM typed ciphertext (for TryFrom).
type MlKemCt = Ciphertext<MlKem768>;

/// Byte length of the private seed (`d || z`).
pub const SEED_LEN: usize = 64;

/// Byte length of an encoded ML-KEM-768 encapsulation key.
pub const PUBLIC_KEY_LEN: usize = 1184;

/// Byte length of an ML-KEM-768 ciphertext.
pub const CIPHERTEXT_LEN: usize = 1088;

/// Byte length of the shared secret.
pub const SHARED_KEY_LEN: usize = 32;

/// Shared secret produced by encapsulation or decapsulation. Zeroed on drop.
pub type SharedSecret = Zeroizing<Vec<u8>>;

/// Errors produced by the KEM layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KemError {
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("{0}")]
    InvalidPublicKey(String),

    #[error("encapsulation failed: {0}")]
    EncapsulationFailed(String),

    #[error("{0}")]
    InvalidPrivateKey(String),

    #[error("{0}")]
    DecapsulationFailed(String),

    #[error("unexpected shared key size: {0}")]
    UnexpectedSharedKeySize(usize),
}

// ---------------------------------------------------------------------------
// Private seed
// ---------------------------------------------------------------------------

/// The 64-byte private seed. Zeroed on drop; `Debug` never prints the bytes.
pub struct PrivateSeed(Zeroizing<[u8; SEED_LEN]>);

impl PrivateSeed {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for PrivateSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateSeed([REDACTED])")
    }
}

/// A freshly generated keypair in its on-disk byte form.
#[derive(Debug)]
pub struct Keypair {
    pub private_seed: PrivateSeed,
    pub public_key: Vec<u8>,
}

/// Generate a new keypair from `rng`.
///
/// # Errors
///
/// Returns [`KemError::KeyGenerationFailed`] if the random source fails.
pub fn generate_keypair(rng: &mut impl CryptoRngCore) -> Result<Keypair, KemError> {
    let mut seed = Zeroizing::new([0u8; SEED_LEN]);
    rng.try_fill_bytes(seed.as_mut_slice())
        .map_err(|e| KemError::KeyGenerationFailed(e.to_string()))?;

    let (_, ek) = expand_seed(&seed);
    Ok(Keypair {
        private_seed: PrivateSeed(seed),
        public_key: ek.as_bytes().to_vec(),
    })
}

fn expand_seed(seed: &[u8; SEED_LEN]) -> (Dk, Ek) {
    let mut d = Zeroizing::new([0u8; 32]);
    let mut z = Zeroizing::new([0u8; 32]);
    d.copy_from_slice(&seed[..32]);
    z.copy_from_slice(&seed[32..]);
    MlKem768::generate_deterministic(&B32::from(*d), &B32::from(*z))
}

// ---------------------------------------------------------------------------
// Encapsulation (public) side
// ---------------------------------------------------------------------------

/// A validated ML-KEM-768 encapsulation key.
pub struct EncapsulationKey(Ek);

impl EncapsulationKey {
    /// Decode an encapsulation key from its byte encoding.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::InvalidPublicKey`] if the length is wrong or the
    /// encoding holds coefficients outside the field.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KemError> {
        let arr: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
            KemError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        let ek = Ek::from_bytes(&arr.into());

        // Re-encoding reduces out-of-range coefficients, so a mismatch means
        // the input was not a canonical encoding.
        if ek.as_bytes().as_slice() != bytes {
            return Err(KemError::InvalidPublicKey(
                "encapsulation key is not canonically encoded".into(),
            ));
        }
        Ok(Self(ek))
    }

    /// Encapsulate a fresh shared secret, returning `(shared_secret, ciphertext)`.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::UnexpectedSharedKeySize`] if the shared secret is not
    /// [`SHARED_KEY_LEN`] bytes.
    pub fn encapsulate(
        &self,
        rng: &mut impl CryptoRngCore,
    ) -> Result<(SharedSecret, Vec<u8>), KemError> {
        let (ct, ss) = self
            .0
            .encapsulate(rng)
            .map_err(|e| KemError::EncapsulationFailed(format!("{e:?}")))?;

        let shared = Zeroizing::new(ss.as_slice().to_vec());
        if shared.len() != SHARED_KEY_LEN {
            return Err(KemError::UnexpectedSharedKeySize(shared.len()));
        }
        Ok((shared, ct.as_slice().to_vec()))
    }
}

// ---------------------------------------------------------------------------
// Decapsulation (private) side
// ---------------------------------------------------------------------------

/// A decapsulation key expanded from a private seed.
pub struct DecapsulationKey(Dk);

impl fmt::Debug for DecapsulationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecapsulationKey([REDACTED])")
    }
}

impl DecapsulationKey {
    /// Expand a 64-byte seed into a decapsulation key.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::InvalidPrivateKey`] if `seed` is not [`SEED_LEN`] bytes.
    pub fn from_seed(seed: &[u8]) -> Result<Self, KemError> {
        let arr: Zeroizing<[u8; SEED_LEN]> =
            Zeroizing::new(seed.try_into().map_err(|_| {
                KemError::InvalidPrivateKey(format!(
                    "expected {SEED_LEN}-byte seed, got {} bytes",
                    seed.len()
                ))
            })?);
        let (dk, _) = expand_seed(&arr);
        Ok(Self(dk))
    }

    /// Recover the shared secret from `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`KemError::DecapsulationFailed`] if the ciphertext is not a
    /// well-formed ML-KEM-768 ciphertext.
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<SharedSecret, KemError> {
        let ct = MlKemCt::try_from(ciphertext).map_err(|_| {
            KemError::DecapsulationFailed(format!(
                "expected {CIPHERTEXT_LEN}-byte ciphertext, got {} bytes",
                ciphertext.len()
            ))
        })?;
        let ss = self
            .0
            .decapsulate(&ct)
            .map_err(|e| KemError::DecapsulationFailed(format!("{e:?}")))?;

        let shared = Zeroizing::new(ss.as_slice().to_vec());
        if shared.len() != SHARED_KEY_LEN {
            return Err(KemError::UnexpectedSharedKeySize(shared.len()));
        }
        Ok(shared)
    }
}
