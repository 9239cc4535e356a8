//! Unified error taxonomy for the sealing operations and the decryption server.
//!
//! [`OjsterError`] carries the context (path, key name, cause text) for a
//! failure; [`ErrorKind`] names the class. The mapping from kind to CLI exit
//! code and to HTTP status lives in exactly one place: [`ErrorKind::exit_code`]
//! and [`ErrorKind::http_status`].
//!
//! Messages never contain plaintext, sealed payloads, or key bytes. Per-value
//! failures always name the offending key.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Error class used for exit-code and status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // Keypair
    KeyGenerationFailed,
    PrivateKeyWriteFailed,
    PublicKeyWriteFailed,
    // Seal
    PlaintextUnreadable,
    PublicKeyFileUnreadable,
    InvalidPublicKeyBase64,
    InvalidPublicKey,
    UnexpectedSharedKeySize,
    EncryptionFailed,
    EnvFileUpdateFailed,
    // Unseal: key loading
    PrivateKeyFileUnreadable,
    InvalidPrivateKeyBase64,
    InvalidPrivateKey,
    // Unseal: source and selection
    EnvFileUnreadable,
    MissingKeys,
    // Unseal: per value
    ValueNotSealed,
    MalformedSealedValue,
    InvalidMlkemBase64,
    InvalidGcmBase64,
    DecapsulationFailed,
    DecryptionFailed,
    // Request handling
    InvalidJson,
    InvalidKeyName,
    UnexpectedKeysReturned,
    NoAcceptableEntries,
    TempDirFailed,
    UnsealTaskFailed,
    SubprocessSpawnFailed,
    SubprocessTimeout,
    SubprocessFailed,
    SubprocessInvalidJson,
}

impl ErrorKind {
    /// Process exit code for the CLI path.
    ///
    /// `2` marks "the caller must fix the request"; everything else is `1`.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::MissingKeys | ErrorKind::InvalidKeyName => 2,
            _ => 1,
        }
    }

    /// HTTP status code for the server path.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidJson | ErrorKind::InvalidKeyName | ErrorKind::MissingKeys => 400,

            ErrorKind::PrivateKeyFileUnreadable
            | ErrorKind::InvalidPrivateKeyBase64
            | ErrorKind::InvalidPrivateKey
            | ErrorKind::TempDirFailed
            | ErrorKind::UnsealTaskFailed
            | ErrorKind::SubprocessSpawnFailed => 500,

            ErrorKind::ValueNotSealed
            | ErrorKind::MalformedSealedValue
            | ErrorKind::InvalidMlkemBase64
            | ErrorKind::InvalidGcmBase64
            | ErrorKind::DecapsulationFailed
            | ErrorKind::DecryptionFailed
            | ErrorKind::UnexpectedSharedKeySize
            | ErrorKind::UnexpectedKeysReturned
            | ErrorKind::NoAcceptableEntries
            | ErrorKind::SubprocessFailed
            | ErrorKind::SubprocessInvalidJson => 502,

            ErrorKind::SubprocessTimeout => 504,

            ErrorKind::KeyGenerationFailed
            | ErrorKind::PrivateKeyWriteFailed
            | ErrorKind::PublicKeyWriteFailed
            | ErrorKind::PlaintextUnreadable
            | ErrorKind::PublicKeyFileUnreadable
            | ErrorKind::InvalidPublicKeyBase64
            | ErrorKind::InvalidPublicKey
            | ErrorKind::EncryptionFailed
            | ErrorKind::EnvFileUpdateFailed
            | ErrorKind::EnvFileUnreadable => 500,
        }
    }
}

/// Every failure the sealing operations and the request handler can report.
#[derive(Debug, Error)]
pub enum OjsterError {
    #[error("failed to generate key: {0}")]
    KeyGenerationFailed(String),

    #[error("failed to write private key {path}: {source}")]
    PrivateKeyWriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write public key {path}: {source}")]
    PublicKeyWriteFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read public key file {path}: {source}")]
    PublicKeyFileUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid base64 public key in {path}: {source}")]
    InvalidPublicKeyBase64 {
        path: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid public key in {path}: {cause}")]
    InvalidPublicKey { path: String, cause: String },

    #[error("failed to read plaintext: {0}")]
    PlaintextUnreadable(#[source] io::Error),

    #[error("unexpected shared key size: {0}")]
    UnexpectedSharedKeySize(usize),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("failed to update env file {path}: {source}")]
    EnvFileUpdateFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read private key file {path}: {source}")]
    PrivateKeyFileUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid base64 private key in {path}: {source}")]
    InvalidPrivateKeyBase64 {
        path: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid private key in {path}: {cause}")]
    InvalidPrivateKey { path: String, cause: String },

    #[error("failed to read env file {path}: {source}")]
    EnvFileUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    /// `origin` names the env file path or `"request"`; `keys` is sorted.
    #[error("missing keys in {origin}: {}", .keys.join(", "))]
    MissingKeys { origin: String, keys: Vec<String> },

    #[error("value for {key} does not appear to be sealed (missing prefix)")]
    ValueNotSealed { key: String },

    #[error("sealed value for {key} malformed: {cause}")]
    MalformedSealedValue { key: String, cause: String },

    #[error("invalid base64 mlkem ciphertext for {key}: {source}")]
    InvalidMlkemBase64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid base64 gcm blob for {key}: {source}")]
    InvalidGcmBase64 {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("decapsulation failed for {key}: {cause}")]
    DecapsulationFailed { key: String, cause: String },

    #[error("decryption failed for {key}: {cause}")]
    DecryptionFailed { key: String, cause: String },

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    #[error("decryption backend returned unexpected keys")]
    UnexpectedKeysReturned,

    #[error("decryption produced no acceptable env entries")]
    NoAcceptableEntries,

    #[error("failed to prepare temporary env directory: {0}")]
    TempDirFailed(String),

    #[error("unseal task failed: {0}")]
    UnsealTaskFailed(String),

    #[error("failed to run subprocess: {0}")]
    SubprocessSpawnFailed(#[source] io::Error),

    #[error("subprocess timed out after {0:?}")]
    SubprocessTimeout(Duration),

    /// `code` is `None` when the subprocess was terminated by a signal.
    #[error("subprocess failed (exit {}) after {elapsed:?}", .code.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    SubprocessFailed { code: Option<i32>, elapsed: Duration },

    #[error("subprocess produced invalid JSON after {0:?}")]
    SubprocessInvalidJson(Duration),
}

impl OjsterError {
    /// The class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OjsterError::KeyGenerationFailed(_) => ErrorKind::KeyGenerationFailed,
            OjsterError::PrivateKeyWriteFailed { .. } => ErrorKind::PrivateKeyWriteFailed,
            OjsterError::PublicKeyWriteFailed { .. } => ErrorKind::PublicKeyWriteFailed,
            OjsterError::PublicKeyFileUnreadable { .. } => ErrorKind::PublicKeyFileUnreadable,
            OjsterError::InvalidPublicKeyBase64 { .. } => ErrorKind::InvalidPublicKeyBase64,
            OjsterError::InvalidPublicKey { .. } => ErrorKind::InvalidPublicKey,
            OjsterError::UnexpectedSharedKeySize(_) => ErrorKind::UnexpectedSharedKeySize,
            OjsterError::PlaintextUnreadable(_) => ErrorKind::PlaintextUnreadable,
            OjsterError::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            OjsterError::EnvFileUpdateFailed { .. } => ErrorKind::EnvFileUpdateFailed,
            OjsterError::PrivateKeyFileUnreadable { .. } => ErrorKind::PrivateKeyFileUnreadable,
            OjsterError::InvalidPrivateKeyBase64 { .. } => ErrorKind::InvalidPrivateKeyBase64,
            OjsterError::InvalidPrivateKey { .. } => ErrorKind::InvalidPrivateKey,
            OjsterError::EnvFileUnreadable { .. } => ErrorKind::EnvFileUnreadable,
            OjsterError::MissingKeys { .. } => ErrorKind::MissingKeys,
            OjsterError::ValueNotSealed { .. } => ErrorKind::ValueNotSealed,
            OjsterError::MalformedSealedValue { .. } => ErrorKind::MalformedSealedValue,
            OjsterError::InvalidMlkemBase64 { .. } => ErrorKind::InvalidMlkemBase64,
            OjsterError::InvalidGcmBase64 { .. } => ErrorKind::InvalidGcmBase64,
            OjsterError::DecapsulationFailed { .. } => ErrorKind::DecapsulationFailed,
            OjsterError::DecryptionFailed { .. } => ErrorKind::DecryptionFailed,
            OjsterError::InvalidJson(_) => ErrorKind::InvalidJson,
            OjsterError::InvalidKeyName(_) => ErrorKind::InvalidKeyName,
            OjsterError::UnexpectedKeysReturned => ErrorKind::UnexpectedKeysReturned,
            OjsterError::NoAcceptableEntries => ErrorKind::NoAcceptableEntries,
            OjsterError::TempDirFailed(_) => ErrorKind::TempDirFailed,
            OjsterError::UnsealTaskFailed(_) => ErrorKind::UnsealTaskFailed,
            OjsterError::SubprocessSpawnFailed(_) => ErrorKind::SubprocessSpawnFailed,
            OjsterError::SubprocessTimeout(_) => ErrorKind::SubprocessTimeout,
            OjsterError::SubprocessFailed { .. } => ErrorKind::SubprocessFailed,
            OjsterError::SubprocessInvalidJson(_) => ErrorKind::SubprocessInvalidJson,
        }
    }

    /// Shorthand for `self.kind().exit_code()`.
    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }

    /// Shorthand for `self.kind().http_status()`.
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}
