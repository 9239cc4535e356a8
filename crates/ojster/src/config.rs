//! Configuration loading and validation.
//!
//! All values are read once at startup from `OJSTER_*` environment variables
//! and passed down explicitly. Every field has a default, so an empty
//! environment is a valid configuration.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use common::{protocol, sealed};
use regex::Regex;
use serde::Deserialize;

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "OJSTER";

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Unix socket the server listens on and the client connects to.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Private key used by `serve`.
    #[serde(default = "default_private_key_file")]
    pub private_key_file: PathBuf,

    /// Pattern selecting environment values the `run` client sends for decryption.
    #[serde(default = "default_regex")]
    pub regex: String,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Wall-clock limit for the delegated decryption subprocess.
    #[serde(default = "default_subprocess_timeout")]
    pub subprocess_timeout_secs: u64,

    /// Hard cap on the size of a decryption request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Refuse to serve unless the temp directory is on tmpfs.
    #[serde(default = "default_require_tmpfs")]
    pub require_tmpfs: bool,
}

fn default_socket_path() -> PathBuf {
    "/mnt/ojster/ipc.sock".into()
}
fn default_private_key_file() -> PathBuf {
    "/run/secrets/private_key".into()
}
fn default_regex() -> String {
    sealed::DEFAULT_DETECTION_PATTERN.into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_subprocess_timeout() -> u64 {
    30
}
fn default_max_body_bytes() -> usize {
    protocol::MAX_BODY_BYTES
}
fn default_require_tmpfs() -> bool {
    true
}

impl Config {
    /// Load and validate configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    /// Load from an explicit variable map instead of the process environment.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    #[cfg(test)]
    pub fn from_map(vars: HashMap<String, String>) -> Result<Self> {
        Self::load(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.socket_path.as_os_str().is_empty() {
            anyhow::bail!("OJSTER_SOCKET_PATH must not be empty");
        }
        if self.private_key_file.as_os_str().is_empty() {
            anyhow::bail!("OJSTER_PRIVATE_KEY_FILE must not be empty");
        }
        if self.subprocess_timeout_secs == 0 {
            anyhow::bail!("OJSTER_SUBPROCESS_TIMEOUT_SECS must be > 0");
        }
        if self.max_body_bytes == 0 {
            anyhow::bail!("OJSTER_MAX_BODY_BYTES must be > 0");
        }
        self.value_regex()?;
        Ok(())
    }

    /// The compiled `run` selection pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if `OJSTER_REGEX` is not a valid regular expression.
    pub fn value_regex(&self) -> Result<Regex> {
        Regex::new(&self.regex).with_context(|| format!("invalid OJSTER_REGEX {:?}", self.regex))
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs)
    }
}
