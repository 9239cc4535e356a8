//! HTTP/1.1 over the server's Unix domain socket.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::EnvMap;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tracing::debug;

/// Per-attempt wall-clock limit, connection setup included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw server reply. Interpreting it is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: Bytes,
}

/// Transport-level failures. All of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Sends one decryption request and returns whatever came back.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &EnvMap) -> Result<Reply, TransportError>;
}

/// [`Transport`] that dials a fresh Unix socket connection per request.
#[derive(Debug, Clone)]
pub struct UnixSocketTransport {
    socket_path: PathBuf,
    timeout: Duration,
}

impl UnixSocketTransport {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: REQUEST_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, body: Bytes) -> Result<Reply, TransportError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| TransportError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "client connection closed with error");
            }
        });

        let req = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri("/")
            .header(hyper::header::HOST, "localhost")
            .header(hyper::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(Full::new(body))?;

        let resp = sender.send_request(req).await?;
        let status = resp.status().as_u16();
        let body = resp.into_body().collect().await?.to_bytes();
        Ok(Reply { status, body })
    }
}

#[async_trait]
impl Transport for UnixSocketTransport {
    async fn post(&self, request: &EnvMap) -> Result<Reply, TransportError> {
        let body = Bytes::from(serde_json::to_vec(request)?);
        tokio::time::timeout(self.timeout, self.exchange(body))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use tempfile::TempDir;

    use crate::server::listener;

    async fn spawn_server(router: Router) -> (TempDir, PathBuf, tokio::sync::oneshot::Sender<()>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc.sock");
        let socket = listener::bind(&path).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(listener::serve(socket, router, async {
            let _ = rx.await;
        }));
        (dir, path, tx)
    }

    #[tokio::test]
    async fn posts_json_and_returns_status_and_body() {
        let router = Router::new().route(
            "/",
            post(|Json(req): Json<EnvMap>| async move {
                let reply: EnvMap = req.into_keys().map(|k| (k, "plain".to_string())).collect();
                Json(reply)
            }),
        );
        let (_dir, path, tx) = spawn_server(router).await;

        let transport = UnixSocketTransport::new(path);
        let request = EnvMap::from([("DB_PASS".to_string(), "OJSTER-1:a:b".to_string())]);
        let reply = transport.post(&request).await.unwrap();

        assert_eq!(reply.status, 200);
        let decoded: EnvMap = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(decoded.get("DB_PASS").map(String::as_str), Some("plain"));
        tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_returned_not_raised() {
        let router = Router::new().route(
            "/",
            post(|| async { (axum::http::StatusCode::BAD_GATEWAY, "nope\n") }),
        );
        let (_dir, path, tx) = spawn_server(router).await;

        let reply = UnixSocketTransport::new(path)
            .post(&EnvMap::new())
            .await
            .unwrap();
        assert_eq!(reply.status, 502);
        assert_eq!(&reply.body[..], b"nope\n");
        tx.send(()).unwrap();
    }

    #[tokio::test]
    async fn missing_socket_is_connect_error() {
        let dir = TempDir::new().unwrap();
        let err = UnixSocketTransport::new(dir.path().join("absent.sock"))
            .post(&EnvMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let router = Router::new().route(
            "/",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let (_dir, path, tx) = spawn_server(router).await;

        let err = UnixSocketTransport::new(path)
            .with_timeout(Duration::from_millis(100))
            .post(&EnvMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
        tx.send(()).unwrap();
    }
}
