//! Unsealing stored values with the private key.

use std::fs;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{sealed, EnvMap, OjsterError};
use tracing::debug;
use zeroize::Zeroizing;

use crate::crypto::{
    aead,
    kem::{DecapsulationKey, KemError},
};
use crate::envfile;

/// Where the stored values come from.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    /// An env file on disk. A missing file is an empty source.
    File(&'a Path),
    /// An in-memory map, as received by the decryption server.
    Map(&'a EnvMap),
}

impl Source<'_> {
    /// Name used in error messages.
    pub fn name(&self) -> String {
        match self {
            Source::File(path) => path.display().to_string(),
            Source::Map(_) => "request".to_string(),
        }
    }
}

/// How [`Unsealed::render`] formats its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// A single compact JSON object.
    Json,
    /// One `KEY=VALUE` env line per key, in selection order.
    EnvLines,
}

/// The result of an unseal: decrypted values plus the selection order.
#[derive(Debug, Default)]
pub struct Unsealed {
    pub order: Vec<String>,
    pub values: EnvMap,
}

impl Unsealed {
    /// `true` when nothing was selected.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Render the decrypted values. Both formats end with a newline unless empty.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                // A map of strings always serialises.
                let json = serde_json::to_string(&self.values).unwrap_or_default();
                format!("{json}\n")
            }
            OutputFormat::EnvLines => self
                .order
                .iter()
                .filter_map(|k| self.values.get(k).map(|v| envfile::format_entry(k, v)))
                .map(|line| line + "\n")
                .collect(),
        }
    }
}

/// Decrypt the selected values of `source` with the private key at `priv_path`.
///
/// With no `requested` keys, every value that looks sealed is selected in
/// sorted key order; an empty selection succeeds with empty output. With
/// explicit keys, every one must exist in the source.
///
/// # Errors
///
/// - private key loading errors, see [`load_private_key`].
/// - [`OjsterError::EnvFileUnreadable`] if a file source cannot be read.
/// - [`OjsterError::MissingKeys`] listing absent keys in sorted order.
/// - the first per-value failure, see [`unseal_value`].
pub fn unseal(
    source: Source<'_>,
    priv_path: &Path,
    requested: &[String],
) -> Result<Unsealed, OjsterError> {
    let dk = load_private_key(priv_path)?;

    let loaded;
    let entries: &EnvMap = match source {
        Source::Map(map) => map,
        Source::File(path) => {
            loaded = envfile::parse_file(path).map_err(|source| OjsterError::EnvFileUnreadable {
                path: path.display().to_string(),
                source,
            })?;
            &loaded
        }
    };

    let order: Vec<String> = if requested.is_empty() {
        // BTreeMap iteration is already sorted.
        entries
            .iter()
            .filter(|(_, v)| sealed::is_sealed(v))
            .map(|(k, _)| k.clone())
            .collect()
    } else {
        // Repeated names render once, at their first position.
        let mut seen = std::collections::HashSet::new();
        requested
            .iter()
            .filter(|k| seen.insert(k.as_str()))
            .cloned()
            .collect()
    };
    if order.is_empty() {
        debug!(source = %source.name(), "no sealed entries selected");
        return Ok(Unsealed::default());
    }

    let mut missing: Vec<String> = order
        .iter()
        .filter(|k| !entries.contains_key(*k))
        .cloned()
        .collect();
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(OjsterError::MissingKeys {
            origin: source.name(),
            keys: missing,
        });
    }

    let mut values = EnvMap::new();
    for key in &order {
        let plaintext = unseal_value(key, &entries[key], &dk)?;
        values.insert(key.clone(), plaintext);
    }
    debug!(source = %source.name(), count = values.len(), "values unsealed");

    Ok(Unsealed { order, values })
}

/// Read and decode the base64 private seed file at `path`.
///
/// # Errors
///
/// [`OjsterError::PrivateKeyFileUnreadable`], [`OjsterError::InvalidPrivateKeyBase64`]
/// or [`OjsterError::InvalidPrivateKey`].
pub fn load_private_key(path: &Path) -> Result<DecapsulationKey, OjsterError> {
    let text = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
        OjsterError::PrivateKeyFileUnreadable {
            path: path.display().to_string(),
            source,
        }
    })?);
    let seed = Zeroizing::new(STANDARD.decode(text.trim()).map_err(|source| {
        OjsterError::InvalidPrivateKeyBase64 {
            path: path.display().to_string(),
            source,
        }
    })?);
    DecapsulationKey::from_seed(&seed).map_err(|e| OjsterError::InvalidPrivateKey {
        path: path.display().to_string(),
        cause: e.to_string(),
    })
}

/// Decrypt one stored value. Every error names `key`.
///
/// # Errors
///
/// [`OjsterError::ValueNotSealed`], [`OjsterError::MalformedSealedValue`],
/// [`OjsterError::InvalidMlkemBase64`], [`OjsterError::InvalidGcmBase64`],
/// [`OjsterError::DecapsulationFailed`] or [`OjsterError::DecryptionFailed`].
pub fn unseal_value(key: &str, stored: &str, dk: &DecapsulationKey) -> Result<String, OjsterError> {
    if !sealed::is_sealed(stored) {
        return Err(OjsterError::ValueNotSealed { key: key.to_string() });
    }
    let parts = sealed::parse(stored).map_err(|e| OjsterError::MalformedSealedValue {
        key: key.to_string(),
        cause: e.to_string(),
    })?;

    let kem_ct = STANDARD
        .decode(parts.kem_b64)
        .map_err(|source| OjsterError::InvalidMlkemBase64 {
            key: key.to_string(),
            source,
        })?;
    let blob = STANDARD
        .decode(parts.aead_b64)
        .map_err(|source| OjsterError::InvalidGcmBase64 {
            key: key.to_string(),
            source,
        })?;

    let shared = dk.decapsulate(&kem_ct).map_err(|e| match e {
        KemError::UnexpectedSharedKeySize(n) => OjsterError::UnexpectedSharedKeySize(n),
        other => OjsterError::DecapsulationFailed {
            key: key.to_string(),
            cause: other.to_string(),
        },
    })?;

    let plaintext = aead::decrypt(&shared, &blob).map_err(|e| OjsterError::DecryptionFailed {
        key: key.to_string(),
        cause: e.to_string(),
    })?;

    String::from_utf8(plaintext).map_err(|_| OjsterError::DecryptionFailed {
        key: key.to_string(),
        cause: "plaintext is not valid UTF-8".to_string(),
    })
}
