//! The three sealing verbs: keypair generation, sealing, and unsealing.
//!
//! Each operation is a linear pipeline whose first failure short-circuits
//! with an [`common::OjsterError`]; the CLI maps that to an exit code and the
//! server maps it to an HTTP status.

pub mod keypair;
pub mod seal;
pub mod unseal;

pub use keypair::keypair;
pub use seal::seal;
pub use unseal::{unseal, OutputFormat, Source};

/// Default private key path for `keypair` and `unseal`.
pub const DEFAULT_PRIV_FILE: &str = "ojster_priv.key";

/// Default public key path for `keypair` and `seal`.
pub const DEFAULT_PUB_FILE: &str = "ojster_pub.key";

/// Default env file for `seal` and `unseal`.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Mode of the private key file.
pub const PRIVATE_KEY_MODE: u32 = 0o600;

/// Mode of the public key file.
pub const PUBLIC_KEY_MODE: u32 = 0o644;

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::{Path, PathBuf};

    use rand_core::OsRng;

    /// Write a fresh keypair into `dir`, returning `(priv_path, pub_path)`.
    pub fn write_keypair(dir: &Path) -> (PathBuf, PathBuf) {
        let priv_path = dir.join("priv.key");
        let pub_path = dir.join("pub.key");
        super::keypair(&priv_path, &pub_path, &mut OsRng).unwrap();
        (priv_path, pub_path)
    }
}
