//! `ojster` binary entry point.
//!
//! Verbs:
//! 1. `keypair` / `seal` / `unseal`: local file operations, one-line errors
//!    on stderr and an exit code taken from the error kind.
//! 2. `serve`: load [`Config`], start JSON logging, and run the decryption
//!    server on the Unix socket until SIGINT/SIGTERM.
//! 3. `run`: fetch decrypted values from the server and exec the target.

mod cli;
mod client;
mod config;
mod crypto;
mod envfile;
mod fsutil;
mod ops;
mod server;
mod telemetry;
mod tty;

use std::process::ExitCode;

use common::OjsterError;
use rand_core::OsRng;
use tracing::error;

use cli::Command;
use config::Config;
use server::strategy::{self, Strategy};
use telemetry::LogFormat;

/// Log level for the file verbs and the run client unless `RUST_LOG` overrides it.
const CLI_LOG_LEVEL: &str = "warn";

/// Exit code for configuration that cannot be loaded.
const CONFIG_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match cli::parse(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1));
        }
    };

    ExitCode::from(dispatch(cli.command).await)
}

async fn dispatch(command: Command) -> u8 {
    match command {
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            0
        }
        Command::Keypair {
            priv_file,
            pub_file,
        } => {
            init_cli_logging();
            report(ops::keypair(&priv_file, &pub_file, &mut OsRng).map(|summary| print!("{summary}")))
        }
        Command::Seal { pub_file, out, key } => {
            init_cli_logging();
            report(seal(&pub_file, &out, &key))
        }
        Command::Unseal {
            input,
            priv_file,
            json,
            keys,
        } => {
            init_cli_logging();
            let format = if json {
                ops::OutputFormat::Json
            } else {
                ops::OutputFormat::EnvLines
            };
            report(
                ops::unseal(ops::Source::File(&input), &priv_file, &keys).map(|unsealed| {
                    if unsealed.is_empty() {
                        eprintln!("no sealed entries found in {}", input.display());
                    }
                    print!("{}", unsealed.render(format));
                }),
            )
        }
        Command::Serve { delegated, command } => serve(delegated, command).await,
        Command::Run { command } => run(command).await,
    }
}

fn init_cli_logging() {
    let _ = telemetry::init_logging(CLI_LOG_LEVEL, LogFormat::Compact);
}

fn report(result: Result<(), OjsterError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

fn seal(
    pub_file: &std::path::Path,
    out: &std::path::Path,
    key: &str,
) -> Result<(), OjsterError> {
    let confirmation = ops::seal(
        pub_file,
        out,
        key,
        || tty::read_secret(cli::SEAL_PROMPT),
        &mut OsRng,
    )?;
    eprintln!("{confirmation}");
    Ok(())
}

fn load_config() -> Result<Config, u8> {
    Config::from_env().map_err(|e| {
        // Logging is not up yet; write to stderr directly.
        eprintln!("configuration invalid: {e:#}");
        CONFIG_EXIT_CODE
    })
}

async fn serve(delegated: bool, command: Vec<String>) -> u8 {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };
    if let Err(e) = telemetry::init_logging(&cfg.log_level, LogFormat::Json) {
        eprintln!("{e:#}");
        return 1;
    }

    let strategy = if !command.is_empty() {
        Strategy::Delegated { command }
    } else if delegated {
        match std::env::current_exe() {
            Ok(exe) => Strategy::Delegated {
                command: strategy::default_delegated_command(&exe),
            },
            Err(e) => {
                error!(error = %e, "cannot locate own executable for delegated mode");
                return 1;
            }
        }
    } else {
        Strategy::Direct
    };

    match server::run(&cfg, strategy).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %format!("{e:#}"), "server failed");
            eprintln!("{e:#}");
            1
        }
    }
}

async fn run(command: Vec<String>) -> u8 {
    let cfg = match load_config() {
        Ok(cfg) => cfg,
        Err(code) => return code,
    };
    init_cli_logging();

    let value_re = match cfg.value_regex() {
        Ok(re) => re,
        Err(e) => {
            eprintln!("{e:#}");
            return CONFIG_EXIT_CODE;
        }
    };

    let transport = client::transport::UnixSocketTransport::new(cfg.socket_path.clone());
    match client::run(&transport, &value_re, &command, client::RetryPolicy::default()).await {
        Ok(never) => match never {},
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}
