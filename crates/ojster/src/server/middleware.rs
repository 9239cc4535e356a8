//! Axum middleware layers applied to the router.
//!
//! Request tracing records method, path, status, and latency only. Bodies are
//! never logged.

use std::time::Duration;

use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, HttpMakeClassifier, TraceLayer};
use tracing::Level;

/// Extra time a request may take beyond the subprocess timeout.
pub const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(5);

/// Whole-request timeout: long enough for a delegated subprocess to hit its
/// own timeout first and be reported as `504`.
pub fn request_timeout(subprocess_timeout: Duration) -> Duration {
    subprocess_timeout + REQUEST_TIMEOUT_SLACK
}

/// Request tracing at `INFO`, without headers or bodies.
pub fn trace_layer() -> TraceLayer<HttpMakeClassifier> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO))
}
