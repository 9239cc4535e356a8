//! Keypair generation.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::OjsterError;
use rand_core::CryptoRngCore;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::{PRIVATE_KEY_MODE, PUBLIC_KEY_MODE};
use crate::crypto::kem;
use crate::fsutil;

/// Generate a keypair and write both halves as base64 lines.
///
/// The private key is written first with mode `0600`, then the public key
/// with mode `0644`. If the public key cannot be written the private key file
/// is removed again. Returns a summary naming both absolute paths and the
/// public key text.
///
/// # Errors
///
/// [`OjsterError::KeyGenerationFailed`], [`OjsterError::PrivateKeyWriteFailed`]
/// or [`OjsterError::PublicKeyWriteFailed`].
pub fn keypair(
    priv_path: &Path,
    pub_path: &Path,
    rng: &mut impl CryptoRngCore,
) -> Result<String, OjsterError> {
    let kp = kem::generate_keypair(rng).map_err(|e| OjsterError::KeyGenerationFailed(e.to_string()))?;

    let priv_line = Zeroizing::new(format!("{}\n", STANDARD.encode(kp.private_seed.as_bytes())));
    let pub_b64 = STANDARD.encode(&kp.public_key);

    fsutil::write_atomic(priv_path, priv_line.as_bytes(), PRIVATE_KEY_MODE).map_err(|source| {
        OjsterError::PrivateKeyWriteFailed {
            path: priv_path.display().to_string(),
            source,
        }
    })?;

    if let Err(source) =
        fsutil::write_atomic(pub_path, format!("{pub_b64}\n").as_bytes(), PUBLIC_KEY_MODE)
    {
        if let Err(e) = fs::remove_file(priv_path) {
            warn!(path = %priv_path.display(), error = %e, "failed to remove private key after public key write failure");
        }
        return Err(OjsterError::PublicKeyWriteFailed {
            path: pub_path.display().to_string(),
            source,
        });
    }
    debug!(private = %priv_path.display(), public = %pub_path.display(), "keypair written");

    Ok(format!(
        "Wrote private key to {} (mode 0600)\nWrote public key to {} (mode 0644)\n\nPUBLIC (base64):\n{pub_b64}\n",
        absolute(priv_path),
        absolute(pub_path),
    ))
}

fn absolute(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}
