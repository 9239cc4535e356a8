//! Run-mode client.
//!
//! Picks sealed-looking values out of the process environment, asks the
//! server to decrypt them, then replaces the current process with the target
//! command running under the decrypted environment. The server is retried
//! until it answers with an acceptable reply.

pub mod transport;

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{protocol, EnvMap};
use regex::Regex;
use tracing::{info, warn};

use crate::server::strategy::RESERVED_ENV_PREFIX;
use transport::{Reply, Transport, TransportError};

/// Failures that end the run flow before or instead of `exec`.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("run requires a command to execute. Usage: ojster run [--] <command> [args...]")]
    MissingCommand,

    #[error("no environment variables have values matching OJSTER_REGEX; nothing to send")]
    NothingToSend,

    #[error("executable not found {name:?}")]
    CommandNotFound { name: String },

    #[error("failed to exec {}: {source}", path.display())]
    ExecFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::ExecFailed { .. } => 1,
            _ => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Exponential backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay following `current`, doubled and capped at `max`.
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Why a reply was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum RetryReason {
    #[error("request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("failed to decode JSON response (status={status}): {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("reply contains unexpected keys (status={0})")]
    UnexpectedKeys(u16),
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Select entries whose name fits the request grammar and whose value matches `value_re`.
///
/// Entries that are not valid UTF-8 are skipped.
pub fn select_candidates<I>(env: I, value_re: &Regex) -> EnvMap
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    env.into_iter()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .filter(|(k, v)| protocol::is_valid_request_key(k) && value_re.is_match(v))
        .collect()
}

/// Accept a reply only if it is a 2xx JSON object limited to requested keys.
///
/// # Errors
///
/// Returns the reason the attempt must be retried.
pub fn evaluate_reply(
    outcome: Result<Reply, TransportError>,
    request: &EnvMap,
) -> Result<EnvMap, RetryReason> {
    let reply = outcome?;
    if !(200..300).contains(&reply.status) {
        return Err(RetryReason::Status(reply.status));
    }
    let decoded: EnvMap =
        serde_json::from_slice(&reply.body).map_err(|source| RetryReason::Decode {
            status: reply.status,
            source,
        })?;
    if decoded.keys().any(|k| !request.contains_key(k)) {
        return Err(RetryReason::UnexpectedKeys(reply.status));
    }
    Ok(decoded)
}

/// Post `request` until the server answers acceptably.
///
/// Never gives up; each failed attempt is logged with its reason and the
/// delay before the next one.
pub async fn fetch_decrypted<T>(transport: &T, request: &EnvMap, policy: RetryPolicy) -> EnvMap
where
    T: Transport + ?Sized,
{
    let mut backoff = policy.initial;
    loop {
        match evaluate_reply(transport.post(request).await, request) {
            Ok(values) => return values,
            Err(reason) => {
                warn!(reason = %reason, retry_in = ?backoff, "decryption request not accepted");
                tokio::time::sleep(backoff).await;
                backoff = policy.next(backoff);
            }
        }
    }
}

/// Compute the environment for the target command.
///
/// `OJSTER_*` variables are dropped. A decrypted value replaces the entry of
/// the same name, and names absent from `current` are never introduced.
pub fn build_exec_env<I>(current: I, decrypted: &EnvMap) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut allowed = HashSet::new();
    let mut out: Vec<(OsString, OsString)> = Vec::new();

    for (k, v) in current {
        if k.as_bytes().starts_with(RESERVED_ENV_PREFIX.as_bytes()) {
            continue;
        }
        if let Some(name) = k.to_str() {
            allowed.insert(name.to_string());
            if decrypted.contains_key(name) {
                continue;
            }
        }
        out.push((k, v));
    }

    out.extend(
        decrypted
            .iter()
            .filter(|(k, _)| allowed.contains(k.as_str()))
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );
    out
}

/// Resolve `name` the way a shell would: paths containing `/` are used as-is,
/// bare names are searched for in `path_var`. Only executable files match.
pub fn look_path(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let cwd = std::env::current_dir().unwrap_or_default();
    which::which_in(name, path_var, cwd).ok()
}

/// Replace the current process with `program`. Returns only on failure.
pub fn exec_command(program: &Path, argv: &[String], env: Vec<(OsString, OsString)>) -> RunError {
    let (arg0, rest) = match argv.split_first() {
        Some((first, rest)) => (first.as_str(), rest),
        None => return RunError::MissingCommand,
    };
    let source = std::process::Command::new(program)
        .arg0(arg0)
        .args(rest)
        .env_clear()
        .envs(env)
        .exec();
    RunError::ExecFailed {
        path: program.to_path_buf(),
        source,
    }
}

/// Full run flow against the process environment.
///
/// # Errors
///
/// On success the process image is replaced and this never returns.
pub async fn run<T>(
    transport: &T,
    value_re: &Regex,
    command: &[String],
    policy: RetryPolicy,
) -> Result<std::convert::Infallible, RunError>
where
    T: Transport + ?Sized,
{
    let name = command.first().ok_or(RunError::MissingCommand)?;

    let request = select_candidates(std::env::vars_os(), value_re);
    if request.is_empty() {
        return Err(RunError::NothingToSend);
    }
    info!(keys = request.len(), "requesting decryption");

    let decrypted = fetch_decrypted(transport, &request, policy).await;
    let env = build_exec_env(std::env::vars_os(), &decrypted);

    let program = look_path(name, std::env::var_os("PATH").as_deref())
        .ok_or_else(|| RunError::CommandNotFound { name: name.clone() })?;
    Err(exec_command(&program, command, env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use common::sealed;
    use mockall::Sequence;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;
    use transport::MockTransport;

    fn os_env(pairs: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        pairs
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    fn map(pairs: &[(&str, &str)]) -> EnvMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ok_reply(body: &str) -> Result<Reply, TransportError> {
        Ok(Reply {
            status: 200,
            body: Bytes::from(body.to_string()),
        })
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    // -- selection ----------------------------------------------------------

    #[test]
    fn selects_only_matching_values_with_valid_names() {
        let env = os_env(&[
            ("DB_PASS", "OJSTER-1:AAAA:BBBB"),
            ("quoted", "'OJSTER-1:AAAA:BBBB'"),
            ("PLAIN", "hello"),
            ("BAD-NAME", "OJSTER-1:AAAA:BBBB"),
            ("9LEADING", "OJSTER-1:AAAA:BBBB"),
        ]);
        let selected = select_candidates(env, &sealed::default_detection_pattern());
        assert_eq!(
            selected,
            map(&[
                ("DB_PASS", "OJSTER-1:AAAA:BBBB"),
                ("quoted", "'OJSTER-1:AAAA:BBBB'"),
            ])
        );
    }

    #[test]
    fn custom_pattern_is_honoured() {
        let re = Regex::new("^enc:").unwrap();
        let selected = select_candidates(os_env(&[("A", "enc:x"), ("B", "OJSTER-1:a:b")]), &re);
        assert_eq!(selected, map(&[("A", "enc:x")]));
    }

    // -- reply evaluation ---------------------------------------------------

    #[test]
    fn accepts_subset_of_requested_keys() {
        let request = map(&[("A", "x"), ("B", "y")]);
        let got = evaluate_reply(ok_reply(r#"{"A":"1"}"#), &request).unwrap();
        assert_eq!(got, map(&[("A", "1")]));
    }

    #[test]
    fn rejects_non_success_status() {
        let outcome = Ok(Reply {
            status: 502,
            body: Bytes::from_static(b"decryption failed for A\n"),
        });
        let reason = evaluate_reply(outcome, &map(&[("A", "x")])).unwrap_err();
        assert!(matches!(reason, RetryReason::Status(502)));
        assert!(!reason.to_string().contains("decryption failed"));
    }

    #[test]
    fn rejects_invalid_json_and_unexpected_keys() {
        let request = map(&[("A", "x")]);
        assert!(matches!(
            evaluate_reply(ok_reply("not json"), &request),
            Err(RetryReason::Decode { status: 200, .. })
        ));
        assert!(matches!(
            evaluate_reply(ok_reply(r#"{"A":"1","B":"2"}"#), &request),
            Err(RetryReason::UnexpectedKeys(200))
        ));
    }

    #[test]
    fn rejects_transport_errors() {
        let outcome = Err(TransportError::Timeout(Duration::from_secs(15)));
        assert!(matches!(
            evaluate_reply(outcome, &map(&[("A", "x")])),
            Err(RetryReason::Transport(_))
        ));
    }

    // -- retry loop ---------------------------------------------------------

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.next(Duration::from_secs(1)), Duration::from_secs(2));
        assert_eq!(p.next(Duration::from_secs(16)), Duration::from_secs(30));
        assert_eq!(p.next(Duration::from_secs(30)), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn retries_until_an_acceptable_reply() {
        let request = map(&[("A", "OJSTER-1:a:b")]);
        let mut seq = Sequence::new();
        let mut mock = MockTransport::new();
        mock.expect_post()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TransportError::Timeout(Duration::from_secs(15))));
        mock.expect_post()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(Reply {
                    status: 500,
                    body: Bytes::new(),
                })
            });
        mock.expect_post()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok_reply(r#"{"A":"1","EXTRA":"2"}"#));
        mock.expect_post()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| ok_reply(r#"{"A":"plain"}"#));

        let got = fetch_decrypted(&mock, &request, fast_policy()).await;
        assert_eq!(got, map(&[("A", "plain")]));
    }

    // -- exec environment ---------------------------------------------------

    #[test]
    fn exec_env_strips_reserved_and_overrides_existing() {
        let current = os_env(&[
            ("PATH", "/bin"),
            ("DB_PASS", "OJSTER-1:a:b"),
            ("OJSTER_SOCKET_PATH", "/tmp/s"),
            ("OJSTER_REGEX", "x"),
        ]);
        let decrypted = map(&[("DB_PASS", "hunter2")]);
        let mut env = build_exec_env(current, &decrypted);
        env.sort();
        assert_eq!(env, os_env(&[("DB_PASS", "hunter2"), ("PATH", "/bin")]));
    }

    #[test]
    fn exec_env_never_introduces_new_names() {
        let env = build_exec_env(os_env(&[("A", "1")]), &map(&[("B", "2")]));
        assert_eq!(env, os_env(&[("A", "1")]));
    }

    #[test]
    fn exec_env_does_not_reintroduce_reserved_names() {
        let env = build_exec_env(
            os_env(&[("OJSTER_REGEX", "x")]),
            &map(&[("OJSTER_REGEX", "y")]),
        );
        assert!(env.is_empty());
    }

    // -- command resolution -------------------------------------------------

    #[test]
    fn look_path_searches_path_entries() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("tool");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path_var = std::env::join_paths(["/nonexistent", dir.path().to_str().unwrap()]).unwrap();
        assert_eq!(look_path("tool", Some(path_var.as_os_str())), Some(bin.clone()));
        assert_eq!(look_path(bin.to_str().unwrap(), None), Some(bin));
        assert_eq!(look_path("missing-tool", Some(path_var.as_os_str())), None);
        assert_eq!(look_path("tool", None), None);
    }

    #[test]
    fn look_path_skips_non_executable_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("data");
        std::fs::write(&file, "x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(look_path(file.to_str().unwrap(), None), None);
    }

    #[test]
    fn exec_failure_is_reported_with_exit_code_one() {
        let dir = TempDir::new().unwrap();
        let err = exec_command(&dir.path().join("absent"), &["absent".to_string()], Vec::new());
        assert!(matches!(err, RunError::ExecFailed { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn usage_errors_exit_two() {
        assert_eq!(RunError::MissingCommand.exit_code(), 2);
        assert_eq!(RunError::NothingToSend.exit_code(), 2);
        assert_eq!(
            RunError::CommandNotFound {
                name: "x".into()
            }
            .exit_code(),
            2
        );
    }
}
