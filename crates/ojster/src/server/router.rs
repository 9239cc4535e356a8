//! Axum router construction.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::timeout::TimeoutLayer;

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", post(handlers::decrypt))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(middleware::trace_layer())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{body::Body, http::Request};
    use axum_test::TestServer;
    use common::{protocol::MAX_BODY_BYTES, EnvMap};
    use rand_core::OsRng;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::ops;
    use crate::ops::testutil::write_keypair;
    use crate::server::strategy::{DirectUnsealer, MockUnsealer};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn mock_app() -> Router {
        build(AppState::new(Arc::new(MockUnsealer::new()), MAX_BODY_BYTES), TIMEOUT)
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let req = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = mock_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn get_on_decrypt_route_is_rejected() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let resp = mock_app().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 405);
    }

    #[tokio::test]
    async fn health_route_exists() {
        let server = TestServer::new(mock_app()).unwrap();
        let resp = server.get("/health").await;
        resp.assert_status_ok();
    }

    #[tokio::test]
    async fn direct_end_to_end() {
        let dir = TempDir::new().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let ek = ops::seal::load_public_key(&pub_path).unwrap();

        let mut request = EnvMap::new();
        request.insert(
            "DB_PASSWORD".into(),
            ops::seal::seal_value(&ek, b"hunter2", &mut OsRng).unwrap(),
        );
        request.insert(
            "API_TOKEN".into(),
            format!("'{}'", ops::seal::seal_value(&ek, b"tok", &mut OsRng).unwrap()),
        );

        let state = AppState::new(Arc::new(DirectUnsealer::new(priv_path)), MAX_BODY_BYTES);
        let server = TestServer::new(build(state, TIMEOUT)).unwrap();

        let resp = server.post("/").json(&request).await;
        resp.assert_status_ok();
        let body: EnvMap = resp.json();
        assert_eq!(body.len(), 2);
        assert_eq!(body["DB_PASSWORD"], "hunter2");
        assert_eq!(body["API_TOKEN"], "tok");
    }

    #[tokio::test]
    async fn direct_tampered_value_is_502() {
        let dir = TempDir::new().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let ek = ops::seal::load_public_key(&pub_path).unwrap();
        let sealed = ops::seal::seal_value(&ek, b"v", &mut OsRng).unwrap();
        // Drop the last base64 quantum of the AEAD segment.
        let tampered = format!("{}AAAA", &sealed[..sealed.len() - 4]);

        let mut request = EnvMap::new();
        request.insert("K".into(), tampered);

        let state = AppState::new(Arc::new(DirectUnsealer::new(priv_path)), MAX_BODY_BYTES);
        let server = TestServer::new(build(state, TIMEOUT)).unwrap();

        let resp = server.post("/").json(&request).expect_failure().await;
        resp.assert_status(axum::http::StatusCode::BAD_GATEWAY);
        assert!(resp.text().contains("decryption failed for K"));
    }

    #[tokio::test]
    async fn direct_request_without_sealed_values_is_502() {
        let dir = TempDir::new().unwrap();
        let (priv_path, _) = write_keypair(dir.path());

        let mut request = EnvMap::new();
        request.insert("PLAIN".into(), "not sealed".into());

        let state = AppState::new(Arc::new(DirectUnsealer::new(priv_path)), MAX_BODY_BYTES);
        let server = TestServer::new(build(state, TIMEOUT)).unwrap();

        let resp = server.post("/").json(&request).expect_failure().await;
        resp.assert_status(axum::http::StatusCode::BAD_GATEWAY);
    }
}
