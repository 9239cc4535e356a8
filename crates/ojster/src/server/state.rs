//! Shared application state injected into every Axum handler.

use std::sync::Arc;
use std::time::Instant;

use super::strategy::Unsealer;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the strategy is behind an `Arc` and the rest is `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Decryption strategy selected at startup.
    pub unsealer: Arc<dyn Unsealer>,
    /// Process start, for the health endpoint's uptime.
    pub started: Instant,
    /// Hard cap on `POST /` body size.
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(unsealer: Arc<dyn Unsealer>, max_body_bytes: usize) -> Self {
        Self {
            unsealer,
            started: Instant::now(),
            max_body_bytes,
        }
    }
}
