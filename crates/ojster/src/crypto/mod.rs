//! Cryptographic engines used by the sealing operations.
//!
//! - [`kem`]: ML-KEM-768 key generation, encapsulation, and decapsulation.
//! - [`aead`]: AES-256-GCM encryption of the plaintext under the KEM shared secret.
//!
//! Both engines take their random source as an explicit argument so tests can
//! drive them with a fixed generator.

pub mod aead;
pub mod kem;
