//! Sealed-value text envelope.
//!
//! ```text
//! OJSTER-1:<base64(kem_ciphertext)>:<base64(nonce || aead_ciphertext)>
//! ```
//!
//! Base64 is the standard alphabet with padding, so the `:` separator can
//! never occur inside either segment. A sealed value may be wrapped in a
//! single pair of single quotes when it appears in source text.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use thiserror::Error;

/// Literal tag identifying format version 1.
pub const PREFIX: &str = "OJSTER-1:";

/// Separator between the KEM and AEAD segments.
pub const SEP: &str = ":";

/// Pattern matching a bare or single-quoted sealed value.
pub const DEFAULT_DETECTION_PATTERN: &str = r"^'?(OJSTER-1:[A-Za-z0-9+/=]*:[A-Za-z0-9+/=]*)'?$";

/// Errors produced while parsing a sealed value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealedValueError {
    /// The text does not start with [`PREFIX`].
    #[error("missing {PREFIX} prefix")]
    MissingPrefix,

    /// The payload after the prefix has no [`SEP`].
    #[error("missing separator between ciphertext segments")]
    MissingSeparator,
}

/// Borrowed view of the two base64 segments of a sealed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedParts<'a> {
    /// Base64 of the ML-KEM ciphertext.
    pub kem_b64: &'a str,
    /// Base64 of `nonce || aead_ciphertext`.
    pub aead_b64: &'a str,
}

/// Build the textual envelope from raw KEM ciphertext and AEAD blob bytes.
pub fn build(kem_ciphertext: &[u8], aead_blob: &[u8]) -> String {
    format!(
        "{PREFIX}{}{SEP}{}",
        STANDARD.encode(kem_ciphertext),
        STANDARD.encode(aead_blob),
    )
}

/// Returns `true` if `text`, after removing one optional layer of single
/// quotes, starts with [`PREFIX`].
pub fn is_sealed(text: &str) -> bool {
    strip_single_quotes(text).starts_with(PREFIX)
}

/// Split a sealed value into its two base64 segments.
///
/// Only the first [`SEP`] after the prefix is significant.
///
/// # Errors
///
/// Returns [`SealedValueError::MissingPrefix`] if the value is not sealed and
/// [`SealedValueError::MissingSeparator`] if the payload cannot be split.
pub fn parse(text: &str) -> Result<SealedParts<'_>, SealedValueError> {
    let payload = strip_single_quotes(text)
        .strip_prefix(PREFIX)
        .ok_or(SealedValueError::MissingPrefix)?;
    let (kem_b64, aead_b64) = payload
        .split_once(SEP)
        .ok_or(SealedValueError::MissingSeparator)?;
    Ok(SealedParts { kem_b64, aead_b64 })
}

/// Compile [`DEFAULT_DETECTION_PATTERN`].
pub fn default_detection_pattern() -> Regex {
    Regex::new(DEFAULT_DETECTION_PATTERN).expect("default detection pattern is a valid regex")
}

fn strip_single_quotes(text: &str) -> &str {
    if text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'') {
        &text[1..text.len() - 1]
    } else {
        text
    }
}
