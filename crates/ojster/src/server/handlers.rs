//! Axum request handlers for all service endpoints.

use axum::{
    body::{self, Body},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use common::protocol::{self, DecryptRequest, HealthResponse};
use common::OjsterError;
use tracing::{info, warn};

use super::state::AppState;
use super::strategy::filter_to_requested;

/// `POST /` — decrypt the sealed values in a flat JSON object.
///
/// Replies `200` with the decrypted subset of the requested keys, or a plain
/// text error whose status comes from [`OjsterError::http_status`].
pub async fn decrypt(State(state): State<AppState>, body: Body) -> Response {
    match handle_decrypt(&state, body).await {
        Ok(map) => (StatusCode::OK, Json(map)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn handle_decrypt(state: &AppState, body: Body) -> Result<DecryptRequest, OjsterError> {
    let bytes = body::to_bytes(body, state.max_body_bytes).await.map_err(|_| {
        OjsterError::InvalidJson(format!(
            "request body unreadable or larger than {} bytes",
            state.max_body_bytes
        ))
    })?;

    let request: DecryptRequest =
        serde_json::from_slice(&bytes).map_err(|e| OjsterError::InvalidJson(e.to_string()))?;

    if let Some(bad) = request.keys().find(|k| !protocol::is_valid_request_key(k)) {
        return Err(OjsterError::InvalidKeyName(bad.clone()));
    }
    info!(keys = request.len(), "decryption request");

    let result = state.unsealer.unseal(&request).await?;
    filter_to_requested(&request, result)
}

/// Map an error to its status with the message as a plain text body.
fn error_response(err: &OjsterError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!(kind = ?err.kind(), status = status.as_u16(), error = %err, "decryption request failed");
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{err}\n"),
    )
        .into_response()
}

/// `GET /health` — liveness check. `HEAD` is answered by the same route.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        uptime: state.started.elapsed().as_secs().to_string(),
    })
}

/// Catch-all 404 handler.
pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "404 page not found\n")
}
