//! Request and response types exchanged between the run-mode client and the
//! decryption server, plus the key name grammars both sides validate against.
//!
//! The decryption endpoint speaks flat JSON objects of `KEY -> value` over a
//! local Unix domain socket. Error responses are plain text.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ordered map of key name to value. Ordering keeps output deterministic.
pub type EnvMap = BTreeMap<String, String>;

/// Body of `POST /`: key name to a value the caller believes is sealed.
pub type DecryptRequest = EnvMap;

/// Body of a `200` reply to `POST /`: key name to decrypted plaintext.
pub type DecryptResponse = EnvMap;

/// Hard cap on the size of a `POST /` request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Key name grammars
// ---------------------------------------------------------------------------

/// Grammar for keys written to an env file.
pub const STORED_KEY_PATTERN: &str = r"^[A-Z][A-Z0-9_]*$";

/// Looser grammar accepted for keys arriving over IPC.
pub const REQUEST_KEY_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

static STORED_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(STORED_KEY_PATTERN).expect("stored key pattern is valid"));

static REQUEST_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REQUEST_KEY_PATTERN).expect("request key pattern is valid"));

/// Returns `true` if `name` may be stored in an env file (`^[A-Z][A-Z0-9_]*$`).
pub fn is_valid_stored_key(name: &str) -> bool {
    STORED_KEY_RE.is_match(name)
}

/// Returns `true` if `name` is acceptable in a decryption request
/// (`^[A-Za-z_][A-Za-z0-9_]*$`).
pub fn is_valid_request_key(name: &str) -> bool {
    REQUEST_KEY_RE.is_match(name)
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the server is accepting requests.
    pub status: String,
    /// Current UTC time, RFC 3339.
    pub time: String,
    /// Whole seconds since the server started.
    pub uptime: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_grammar_is_strict_uppercase() {
        assert!(is_valid_stored_key("SECRET"));
        assert!(is_valid_stored_key("DB_PASSWORD_2"));
        assert!(!is_valid_stored_key("secret"));
        assert!(!is_valid_stored_key("_SECRET"));
        assert!(!is_valid_stored_key("2FA"));
        assert!(!is_valid_stored_key(""));
    }

    #[test]
    fn request_grammar_accepts_lowercase_and_underscore() {
        assert!(is_valid_request_key("secret"));
        assert!(is_valid_request_key("_private"));
        assert!(is_valid_request_key("Mixed_Case9"));
        assert!(!is_valid_request_key("BAD-NAME"));
        assert!(!is_valid_request_key("9LIVES"));
        assert!(!is_valid_request_key(""));
    }

    #[test]
    fn decrypt_request_serialises_as_flat_object() {
        let mut req = DecryptRequest::new();
        req.insert("B".into(), "2".into());
        req.insert("A".into(), "1".into());
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"A":"1","B":"2"}"#);
    }

    #[test]
    fn health_response_serde() {
        let h = HealthResponse {
            status: "ok".into(),
            time: "2026-01-01T00:00:00Z".into(),
            uptime: "3".into(),
        };
        let json = serde_json::to_string(&h).unwrap();
        let decoded: HealthResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.uptime, "3");
    }
}
