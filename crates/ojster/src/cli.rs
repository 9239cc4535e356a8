//! Command-line surface.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::ops::{DEFAULT_ENV_FILE, DEFAULT_PRIV_FILE, DEFAULT_PUB_FILE};

/// Program name that makes the binary behave as `ojster run`.
pub const DOCKER_INIT_ALIAS: &str = "docker-init";

/// Prompt shown on the terminal while `seal` reads the plaintext.
pub const SEAL_PROMPT: &str =
    "Reading plaintext input from stdin (input will be hidden). Press Ctrl-D twice when done.\n";

#[derive(Parser, Debug)]
#[command(
    name = "ojster",
    version,
    about = "GitOps-safe one-way encrypted secrets for Docker Compose",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Generate a new keypair. Writes private and public key files.
    Keypair {
        /// Private key file to write.
        #[arg(long, default_value = DEFAULT_PRIV_FILE)]
        priv_file: PathBuf,

        /// Public key file to write.
        #[arg(long, default_value = DEFAULT_PUB_FILE)]
        pub_file: PathBuf,
    },

    /// Encrypt a value read from stdin and store it as KEY in an env file.
    Seal {
        /// Public key file to read.
        #[arg(long, default_value = DEFAULT_PUB_FILE)]
        pub_file: PathBuf,

        /// Env file to update.
        #[arg(long, default_value = DEFAULT_ENV_FILE)]
        out: PathBuf,

        /// Name to store the sealed value under.
        key: String,
    },

    /// Decrypt values from an env file and print them.
    Unseal {
        /// Env file to read.
        #[arg(long = "in", default_value = DEFAULT_ENV_FILE)]
        input: PathBuf,

        /// Private key file to read.
        #[arg(long, default_value = DEFAULT_PRIV_FILE)]
        priv_file: PathBuf,

        /// Print a JSON object instead of env lines.
        #[arg(long)]
        json: bool,

        /// Keys to decrypt. Defaults to every sealed entry.
        keys: Vec<String>,
    },

    /// Listen on the Unix socket and return decrypted values to clients.
    ///
    /// With a trailing command, decryption is delegated to that command.
    Serve {
        /// Delegate to `ojster unseal` in a subprocess when no command is given.
        #[arg(long)]
        delegated: bool,

        /// Command that decrypts `./.env` with `./.env.keys` and prints JSON.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Fetch decrypted values from the server, then exec COMMAND.
    Run {
        #[arg(
            trailing_var_arg = true,
            allow_hyphen_values = true,
            required = true,
            value_name = "COMMAND"
        )]
        command: Vec<String>,
    },

    /// Print the version.
    Version,
}

/// Parse `args`, treating an invocation as `docker-init` like `ojster run`.
///
/// # Errors
///
/// Returns clap's error, which carries its own exit code (2 for usage).
pub fn parse<I>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args: Vec<OsString> = args.into_iter().collect();
    let invoked_as_init = args
        .first()
        .and_then(|argv0| Path::new(argv0).file_name())
        .is_some_and(|name| name == DOCKER_INIT_ALIAS);

    if invoked_as_init {
        args[0] = OsString::from("ojster");
        args.insert(1, OsString::from("run"));
        if args.get(2).map_or(true, |a| a != "--") {
            args.insert(2, OsString::from("--"));
        }
    }
    Cli::try_parse_from(args)
}
