//! Unix domain socket listener and connection loop.

use std::fs::{self, Permissions};
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use axum::{extract::Request, Router};
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::UnixListener;
use tower::ServiceExt;
use tracing::{debug, info, warn};

/// Mode applied to the socket so unprivileged client processes can connect.
pub const SOCKET_MODE: u32 = 0o666;

/// `statfs` magic number of tmpfs.
pub const TMPFS_MAGIC: u64 = 0x0102_1994;

/// Bind `path`, replacing any stale socket file, and open it to all users.
///
/// # Errors
///
/// Returns an error if the stale file cannot be removed, the bind fails, or
/// the permissions cannot be set.
pub fn bind(path: &Path) -> Result<UnixListener> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove stale socket {}", path.display()))
        }
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("failed to listen on unix socket {}", path.display()))?;
    fs::set_permissions(path, Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("failed to chmod socket {}", path.display()))?;
    Ok(listener)
}

/// Serve `router` on `listener` until `shutdown` resolves.
///
/// Each connection is handled on its own task with HTTP/1.1.
pub async fn serve(listener: UnixListener, router: Router, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        };

        let router = router.clone();
        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                router.clone().oneshot(req)
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "connection closed with error");
            }
        });
    }
}

/// Fail unless `path` lives on tmpfs.
///
/// # Errors
///
/// Returns an error if `statfs` fails or the filesystem type differs.
#[cfg(target_os = "linux")]
pub fn ensure_tmpfs(path: &Path) -> Result<()> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("invalid path {}", path.display()))?;
    // SAFETY: statfs is plain data, fully written by a successful call.
    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("failed to statfs {}", path.display()));
    }

    #[allow(clippy::unnecessary_cast)]
    let fs_type = stat.f_type as u64;
    if fs_type != TMPFS_MAGIC {
        anyhow::bail!(
            "path {} is not on tmpfs (statfs type {fs_type:#x})",
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn ensure_tmpfs(path: &Path) -> Result<()> {
    anyhow::bail!("cannot verify that {} is on tmpfs on this platform", path.display())
}
