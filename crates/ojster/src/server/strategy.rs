//! Decryption strategies behind `POST /`.
//!
//! [`DirectUnsealer`] runs the unseal operation in-process against the request
//! map. [`DelegatedUnsealer`] writes the request to a private temporary env
//! file and runs an external command that prints the decrypted JSON object.
//! Both feed [`filter_to_requested`], which enforces the allow-list.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::protocol::{DecryptRequest, DecryptResponse};
use common::{EnvMap, OjsterError};
use tracing::{debug, warn};

use crate::envfile;
use crate::ops::{self, Source};

/// Name of the env file written into the delegated working directory.
pub const DELEGATED_ENV_FILE: &str = ".env";

/// Name of the private key symlink in the delegated working directory.
pub const DELEGATED_KEY_LINK: &str = ".env.keys";

/// Environment variable prefix never passed to child processes.
pub const RESERVED_ENV_PREFIX: &str = "OJSTER_";

/// Produces the decrypted map for a validated request.
///
/// Implementations may return more or fewer keys than requested; the caller
/// filters the result with [`filter_to_requested`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Unsealer: Send + Sync {
    async fn unseal(&self, request: &DecryptRequest) -> Result<EnvMap, OjsterError>;
}

/// Reject results naming keys outside `request`, and reject empty results.
///
/// # Errors
///
/// [`OjsterError::UnexpectedKeysReturned`] or [`OjsterError::NoAcceptableEntries`].
pub fn filter_to_requested(
    request: &DecryptRequest,
    result: EnvMap,
) -> Result<DecryptResponse, OjsterError> {
    if result.keys().any(|k| !request.contains_key(k)) {
        return Err(OjsterError::UnexpectedKeysReturned);
    }
    if result.is_empty() {
        return Err(OjsterError::NoAcceptableEntries);
    }
    Ok(result)
}

/// The strategy chosen at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Delegated { command: Vec<String> },
}

/// Build the unsealer for `strategy`.
pub fn build(strategy: Strategy, private_key_file: PathBuf, timeout: Duration) -> Arc<dyn Unsealer> {
    match strategy {
        Strategy::Direct => Arc::new(DirectUnsealer::new(private_key_file)),
        Strategy::Delegated { command } => {
            Arc::new(DelegatedUnsealer::new(command, private_key_file, timeout))
        }
    }
}

/// Command used when delegated mode is selected without an explicit command.
pub fn default_delegated_command(exe: &Path) -> Vec<String> {
    vec![
        exe.display().to_string(),
        "unseal".into(),
        "--json".into(),
        "--priv-file".into(),
        format!("./{DELEGATED_KEY_LINK}"),
    ]
}

// ---------------------------------------------------------------------------
// Direct
// ---------------------------------------------------------------------------

/// Unseals in-process. Every sealed-looking value in the request is decrypted.
pub struct DirectUnsealer {
    private_key_file: PathBuf,
}

impl DirectUnsealer {
    pub fn new(private_key_file: PathBuf) -> Self {
        Self { private_key_file }
    }
}

#[async_trait]
impl Unsealer for DirectUnsealer {
    async fn unseal(&self, request: &DecryptRequest) -> Result<EnvMap, OjsterError> {
        // Key file read and decapsulation run off the async workers.
        let request = request.clone();
        let private_key_file = self.private_key_file.clone();
        tokio::task::spawn_blocking(move || {
            ops::unseal(Source::Map(&request), &private_key_file, &[]).map(|u| u.values)
        })
        .await
        .map_err(|e| OjsterError::UnsealTaskFailed(format!("task join error: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// Delegated
// ---------------------------------------------------------------------------

/// Runs an external command in a private temporary directory holding the
/// request as `.env` and a `.env.keys` symlink to the private key. The
/// command's stdout must be a JSON object of decrypted values.
pub struct DelegatedUnsealer {
    command: Vec<String>,
    private_key_file: PathBuf,
    timeout: Duration,
}

impl DelegatedUnsealer {
    pub fn new(command: Vec<String>, private_key_file: PathBuf, timeout: Duration) -> Self {
        Self {
            command,
            private_key_file,
            timeout,
        }
    }

    fn prepare_workdir(&self, request: &DecryptRequest) -> Result<tempfile::TempDir, OjsterError> {
        let workdir = tempfile::Builder::new()
            .prefix("ojster-")
            .tempdir()
            .map_err(|e| OjsterError::TempDirFailed(format!("failed to create temp dir: {e}")))?;

        let mut contents = String::new();
        for (k, v) in request {
            contents.push_str(&envfile::format_entry(k, v));
            contents.push('\n');
        }

        let env_path = workdir.path().join(DELEGATED_ENV_FILE);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&env_path)
            .and_then(|mut f| f.write_all(contents.as_bytes()))
            .map_err(|e| OjsterError::TempDirFailed(format!("failed to write env file: {e}")))?;

        std::os::unix::fs::symlink(&self.private_key_file, workdir.path().join(DELEGATED_KEY_LINK))
            .map_err(|e| {
                OjsterError::TempDirFailed(format!("failed to link private key file: {e}"))
            })?;

        Ok(workdir)
    }
}

#[async_trait]
impl Unsealer for DelegatedUnsealer {
    async fn unseal(&self, request: &DecryptRequest) -> Result<EnvMap, OjsterError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(OjsterError::SubprocessSpawnFailed(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            )));
        };

        // Removed with its contents when dropped, on every return path.
        let workdir = self.prepare_workdir(request)?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(workdir.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (name, _) in std::env::vars_os() {
            if name.to_string_lossy().starts_with(RESERVED_ENV_PREFIX) {
                cmd.env_remove(name);
            }
        }

        let start = Instant::now();
        let child = cmd.spawn().map_err(OjsterError::SubprocessSpawnFailed)?;
        debug!(program = %program, "decryption subprocess started");

        // On timeout the wait future is dropped, which kills the child.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                warn!(timeout = ?self.timeout, "decryption subprocess timed out");
                return Err(OjsterError::SubprocessTimeout(self.timeout));
            }
            Ok(Err(e)) => return Err(OjsterError::SubprocessSpawnFailed(e)),
            Ok(Ok(output)) => output,
        };
        let elapsed = start.elapsed();

        if !output.status.success() {
            return Err(OjsterError::SubprocessFailed {
                code: output.status.code(),
                elapsed,
            });
        }
        debug!(elapsed = ?elapsed, "decryption subprocess finished");

        serde_json::from_slice::<EnvMap>(&output.stdout)
            .map_err(|_| OjsterError::SubprocessInvalidJson(elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;
    use rand_core::OsRng;
    use tempfile::TempDir;

    use crate::ops::testutil::write_keypair;

    fn request(pairs: &[(&str, &str)]) -> DecryptRequest {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sh(script: &str, key: &Path, timeout: Duration) -> DelegatedUnsealer {
        DelegatedUnsealer::new(
            vec!["sh".into(), "-c".into(), script.into()],
            key.to_path_buf(),
            timeout,
        )
    }

    // -- filter_to_requested ------------------------------------------------

    #[test]
    fn filter_accepts_subset() {
        let req = request(&[("A", "x"), ("B", "y")]);
        let out = filter_to_requested(&req, request(&[("A", "1")])).unwrap();
        assert_eq!(out, request(&[("A", "1")]));
    }

    #[test]
    fn filter_rejects_extra_keys() {
        let req = request(&[("A", "x")]);
        let err = filter_to_requested(&req, request(&[("A", "1"), ("LEAK", "2")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedKeysReturned);
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn filter_rejects_empty_result() {
        let req = request(&[("A", "x")]);
        let err = filter_to_requested(&req, EnvMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoAcceptableEntries);
    }

    #[test]
    fn default_command_uses_symlinked_key() {
        let cmd = default_delegated_command(Path::new("/usr/bin/ojster"));
        assert_eq!(
            cmd,
            vec!["/usr/bin/ojster", "unseal", "--json", "--priv-file", "./.env.keys"]
        );
    }

    // -- direct --------------------------------------------------------------

    #[tokio::test]
    async fn direct_decrypts_sealed_values_only() {
        let dir = TempDir::new().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let ek = ops::seal::load_public_key(&pub_path).unwrap();
        let sealed = ops::seal::seal_value(&ek, b"s3cret", &mut OsRng).unwrap();

        let unsealer = DirectUnsealer::new(priv_path);
        let out = unsealer
            .unseal(&request(&[("DB_PASS", sealed.as_str()), ("PLAIN", "visible")]))
            .await
            .unwrap();
        assert_eq!(out, request(&[("DB_PASS", "s3cret")]));
    }

    #[tokio::test]
    async fn direct_key_read_does_not_block_the_runtime() {
        let dir = TempDir::new().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let ek = ops::seal::load_public_key(&pub_path).unwrap();
        let sealed = ops::seal::seal_value(&ek, b"piped", &mut OsRng).unwrap();

        // Opening a FIFO blocks until a writer shows up; the writer below is a
        // task on this same single-threaded runtime.
        let fifo = dir.path().join("key.fifo");
        let c_path = std::ffi::CString::new(fifo.as_os_str().as_encoded_bytes()).unwrap();
        assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

        let key_text = std::fs::read(&priv_path).unwrap();
        let writer = tokio::spawn({
            let fifo = fifo.clone();
            async move { tokio::fs::write(fifo, key_text).await }
        });

        let unsealer = DirectUnsealer::new(fifo);
        let out = tokio::time::timeout(
            Duration::from_secs(10),
            unsealer.unseal(&request(&[("K", sealed.as_str())])),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(out, request(&[("K", "piped")]));
        writer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn direct_missing_private_key_is_500() {
        let dir = TempDir::new().unwrap();
        let unsealer = DirectUnsealer::new(dir.path().join("absent"));
        let err = unsealer.unseal(&request(&[("A", "x")])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrivateKeyFileUnreadable);
        assert_eq!(err.http_status(), 500);
    }

    // -- delegated -----------------------------------------------------------

    #[tokio::test]
    async fn delegated_returns_stdout_json() {
        let dir = TempDir::new().unwrap();
        let u = sh(r#"echo '{"A":"plain-a"}'"#, &dir.path().join("k"), Duration::from_secs(5));
        let out = u.unseal(&request(&[("A", "x")])).await.unwrap();
        assert_eq!(out, request(&[("A", "plain-a")]));
    }

    #[tokio::test]
    async fn delegated_workdir_layout() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("private_key");
        let script = r#"printf '{"MODE":"%s","LINK":"%s","VAL":"%s"}' "$(stat -c %a .env)" "$(readlink .env.keys)" "$(cat .env | tr '\n' ' ')""#;
        let u = sh(script, &key, Duration::from_secs(5));

        let out = u
            .unseal(&request(&[("MODE", "m"), ("LINK", "l"), ("VAL", "v")]))
            .await
            .unwrap();
        assert_eq!(out["MODE"], "600");
        assert_eq!(out["LINK"], key.display().to_string());
        assert_eq!(out["VAL"], "LINK=l MODE=m VAL=v ");
    }

    #[tokio::test]
    async fn delegated_workdir_is_removed() {
        let dir = TempDir::new().unwrap();
        let u = sh(r#"printf '{"DIR":"%s"}' "$PWD""#, &dir.path().join("k"), Duration::from_secs(5));
        let out = u.unseal(&request(&[("DIR", "x")])).await.unwrap();
        assert!(!Path::new(&out["DIR"]).exists());
    }

    #[tokio::test]
    async fn delegated_nonzero_exit() {
        let dir = TempDir::new().unwrap();
        let u = sh("exit 3", &dir.path().join("k"), Duration::from_secs(5));
        let err = u.unseal(&request(&[("A", "x")])).await.unwrap_err();
        assert!(matches!(err, OjsterError::SubprocessFailed { code: Some(3), .. }));
        assert_eq!(err.http_status(), 502);
        assert!(err.to_string().contains("exit 3"));
    }

    #[tokio::test]
    async fn delegated_timeout() {
        let dir = TempDir::new().unwrap();
        let u = sh("sleep 10", &dir.path().join("k"), Duration::from_millis(200));
        let started = Instant::now();
        let err = u.unseal(&request(&[("A", "x")])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessTimeout);
        assert_eq!(err.http_status(), 504);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn delegated_invalid_json() {
        let dir = TempDir::new().unwrap();
        let u = sh("echo not-json", &dir.path().join("k"), Duration::from_secs(5));
        let err = u.unseal(&request(&[("A", "x")])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessInvalidJson);
        assert_eq!(err.http_status(), 502);
    }

    #[tokio::test]
    async fn delegated_spawn_failure() {
        let dir = TempDir::new().unwrap();
        let u = DelegatedUnsealer::new(
            vec!["/nonexistent/ojster-helper".into()],
            dir.path().join("k"),
            Duration::from_secs(5),
        );
        let err = u.unseal(&request(&[("A", "x")])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessSpawnFailed);
        assert_eq!(err.http_status(), 500);
    }
}
