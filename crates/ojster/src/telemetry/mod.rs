//! Structured logging setup.
//!
//! The server logs JSON lines to stderr so they can be collected alongside
//! the wrapped service. CLI verbs log compactly and only at `warn` unless
//! `RUST_LOG` says otherwise.
//!
//! # Logging invariants
//!
//! - **No plaintext or key material** may appear in any log field. Handlers
//!   log key counts, never key names paired with values.

pub mod init;

pub use init::{init_logging, LogFormat};
