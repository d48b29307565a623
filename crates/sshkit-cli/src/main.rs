//! sshkit CLI
//!
//! Runs commands and uploads files on one host over a single SSH connection

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use eyre::WrapErr;
use sshkit_exec::{CommandResult, ExecError, ExecOptions, ScriptOptions, SshClient};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Config, CredentialOverride};

#[derive(Parser)]
#[command(name = "sshkit")]
#[command(about = "Run commands and upload files over one SSH connection", long_about = None)]
struct Cli {
    /// Config file (defaults to $SSHKIT_CONFIG, ./sshkit.toml, ~/.config/sshkit/sshkit.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the command result as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Private key file
    #[arg(short = 'i', long, global = true)]
    identity: Option<PathBuf>,

    /// Read the password from this environment variable
    #[arg(long, global = true)]
    password_env: Option<String>,

    /// Host name from the config file, or [user@]host[:port]
    target: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command
    Exec {
        command: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        fail_on_non_zero: bool,
        /// Pipe this file into the command's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,
    },
    /// Run a local script through a remote shell
    Script {
        file: PathBuf,
        #[arg(long)]
        sudo: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        fail_on_non_zero: bool,
    },
    /// Upload a file over SFTP
    Put { local: PathBuf, remote: String },
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn timeout_for(flag: Option<u64>, config: &Config) -> Option<Duration> {
    match flag {
        Some(ms) => Some(Duration::from_millis(ms)),
        None => config.default_timeout(),
    }
}

fn report(result: &CommandResult, json: bool) -> Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        print!("{}", result.stdout);
        eprint!("{}", result.stderr);
    }
    if let Some(signal) = &result.signal {
        warn!(signal = %signal, "remote process terminated by signal");
    }
    Ok(result.status)
}

/// Exit code for a command outcome; failures without a code propagate
fn exit_code(outcome: Result<CommandResult, ExecError>, json: bool) -> Result<i32> {
    match outcome {
        Ok(result) => report(&result, json),
        Err(e) => match e.exit_code() {
            Some(code) if code != 0 => {
                eprintln!("error: {e}");
                Ok(code)
            }
            _ => Err(e.into()),
        },
    }
}

async fn run(client: &SshClient, command: Commands, config: &Config, json: bool) -> Result<i32> {
    match command {
        Commands::Exec {
            command,
            timeout_ms,
            fail_on_non_zero,
            stdin_file,
        } => {
            let mut options = ExecOptions::new().fail_on_non_zero(fail_on_non_zero);
            if let Some(timeout) = timeout_for(timeout_ms, config) {
                options = options.with_timeout(timeout);
            }
            if let Some(path) = stdin_file {
                let data = std::fs::read(&path)
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?;
                options = options.with_stdin(data);
            }
            exit_code(client.exec(&command, options).await, json)
        }
        Commands::Script {
            file,
            sudo,
            timeout_ms,
            fail_on_non_zero,
        } => {
            let script = std::fs::read_to_string(&file)
                .wrap_err_with(|| format!("failed to read {}", file.display()))?;
            let mut options = ScriptOptions::new()
                .sudo(sudo)
                .fail_on_non_zero(fail_on_non_zero);
            if let Some(timeout) = timeout_for(timeout_ms, config) {
                options = options.with_timeout(timeout);
            }
            exit_code(client.exec_script(&script, options).await, json)
        }
        Commands::Put { local, remote } => {
            let bytes = client.upload(&local, &remote).await?;
            if json {
                println!("{}", serde_json::json!({ "remote": remote, "bytes": bytes }));
            } else {
                println!("uploaded {bytes} bytes to {remote}");
            }
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.defaults.log_level.clone());
    init_tracing(&level, cli.log_format);

    let overrides = CredentialOverride {
        identity: cli.identity,
        password_env: cli.password_env,
    };
    let conn_info = config.resolve_target(&cli.target, &overrides)?;
    debug!(remote = %conn_info.target(), "resolved target");

    let client = SshClient::new(conn_info)?;
    let outcome = run(&client, cli.command, &config, cli.json).await;

    if let Err(e) = client.close().await {
        warn!(error = %e, "failed to close SSH connection");
    }

    let code = outcome?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
