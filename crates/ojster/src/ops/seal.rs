//! Sealing a plaintext under a public key into an env file.

use std::fs;
use std::io;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{protocol, sealed, OjsterError};
use rand_core::CryptoRngCore;
use tracing::debug;

use crate::crypto::{
    aead,
    kem::{EncapsulationKey, KemError},
};
use crate::envfile;

/// Seal the plaintext produced by `read_plaintext` under the public key at
/// `pub_path` and store it as `key_name` in the env file at `out_path`.
///
/// The key name and public key are checked before `read_plaintext` runs, so
/// an interactive prompt never appears for a doomed seal.
///
/// Returns the confirmation line `Wrote KEY to PATH`.
///
/// # Errors
///
/// - [`OjsterError::InvalidKeyName`] if `key_name` is not a valid stored key.
/// - public key loading errors, see [`load_public_key`].
/// - [`OjsterError::PlaintextUnreadable`] if `read_plaintext` fails.
/// - [`OjsterError::UnexpectedSharedKeySize`] / [`OjsterError::EncryptionFailed`].
/// - [`OjsterError::EnvFileUpdateFailed`] if the env file cannot be written.
pub fn seal<P, F>(
    pub_path: &Path,
    out_path: &Path,
    key_name: &str,
    read_plaintext: F,
    rng: &mut impl CryptoRngCore,
) -> Result<String, OjsterError>
where
    P: AsRef<[u8]>,
    F: FnOnce() -> io::Result<P>,
{
    if !protocol::is_valid_stored_key(key_name) {
        return Err(OjsterError::InvalidKeyName(key_name.to_string()));
    }

    let ek = load_public_key(pub_path)?;
    let plaintext = read_plaintext().map_err(OjsterError::PlaintextUnreadable)?;
    let sealed_value = seal_value(&ek, plaintext.as_ref(), rng)?;

    envfile::update_file(out_path, key_name, &sealed_value).map_err(|source| {
        OjsterError::EnvFileUpdateFailed {
            path: out_path.display().to_string(),
            source,
        }
    })?;
    debug!(key = key_name, path = %out_path.display(), "sealed value stored");

    Ok(format!("Wrote {key_name} to {}", out_path.display()))
}

/// Read and decode the base64 public key file at `path`.
///
/// # Errors
///
/// [`OjsterError::PublicKeyFileUnreadable`], [`OjsterError::InvalidPublicKeyBase64`]
/// or [`OjsterError::InvalidPublicKey`].
pub fn load_public_key(path: &Path) -> Result<EncapsulationKey, OjsterError> {
    let text = fs::read_to_string(path).map_err(|source| OjsterError::PublicKeyFileUnreadable {
        path: path.display().to_string(),
        source,
    })?;
    let bytes = STANDARD
        .decode(text.trim())
        .map_err(|source| OjsterError::InvalidPublicKeyBase64 {
            path: path.display().to_string(),
            source,
        })?;
    EncapsulationKey::from_bytes(&bytes).map_err(|e| OjsterError::InvalidPublicKey {
        path: path.display().to_string(),
        cause: e.to_string(),
    })
}

/// Encapsulate a fresh shared secret under `ek`, encrypt `plaintext` with it,
/// and return the sealed value text.
///
/// # Errors
///
/// [`OjsterError::UnexpectedSharedKeySize`] or [`OjsterError::EncryptionFailed`].
pub fn seal_value(
    ek: &EncapsulationKey,
    plaintext: &[u8],
    rng: &mut impl CryptoRngCore,
) -> Result<String, OjsterError> {
    let (shared, kem_ct) = ek.encapsulate(rng).map_err(|e| match e {
        KemError::UnexpectedSharedKeySize(n) => OjsterError::UnexpectedSharedKeySize(n),
        other => OjsterError::EncryptionFailed(other.to_string()),
    })?;

    let blob = aead::encrypt(&shared, plaintext, rng)
        .map_err(|e| OjsterError::EncryptionFailed(e.to_string()))?;

    Ok(sealed::build(&kem_ct, &blob))
}
