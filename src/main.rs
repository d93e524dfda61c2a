use anyhow::{Context, Result, anyhow};
use clap::Parser;
use shellexpect::{
    Credential, Engine, LocalShell, RemoteShell, SessionConfig, Shell, parse_duration, parse_file,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "shellexpect",
    about = "Run a script against a command's terminal, locally or over SSH",
    version
)]
struct Args {
    /// Path to the script file
    #[arg(short, long)]
    script: PathBuf,

    /// Shell command to run
    #[arg(short, long)]
    command: String,

    /// Run the command on a remote host instead of locally
    #[arg(long, value_name = "USER@HOST[:PORT]")]
    ssh: Option<String>,

    /// Private key used to authenticate over SSH
    #[arg(short, long, requires = "ssh", conflicts_with = "password_env")]
    identity: Option<PathBuf>,

    /// Environment variable holding the SSH password
    #[arg(long, value_name = "VAR", requires = "ssh")]
    password_env: Option<String>,

    /// Default timeout for `expect` lines without one
    #[arg(short, long, default_value = "30s", value_parser = parse_duration)]
    timeout: Duration,

    /// Terminal width
    #[arg(long, default_value_t = 80)]
    cols: u16,

    /// Terminal height
    #[arg(long, default_value_t = 24)]
    rows: u16,

    /// Wait for the command to exit and use its exit status
    #[arg(long)]
    wait_exit: bool,
}

impl Args {
    fn credential(&self) -> Result<Credential> {
        if let Some(path) = &self.identity {
            return Ok(Credential::KeyFile {
                path: path.clone(),
                passphrase: None,
            });
        }
        let var = self
            .password_env
            .as_deref()
            .ok_or_else(|| anyhow!("--ssh needs --identity or --password-env"))?;
        let password =
            std::env::var(var).with_context(|| format!("Environment variable {var} is not set"))?;
        Ok(Credential::Password(password))
    }
}

/// Split `user@host[:port]`.
fn split_destination(destination: &str) -> Result<(&str, &str)> {
    match destination.split_once('@') {
        Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok((user, host)),
        _ => Err(anyhow!("Expected USER@HOST[:PORT], got: {destination}")),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let commands = parse_file(&args.script)
        .with_context(|| format!("Failed to parse script file: {}", args.script.display()))?;

    let config = SessionConfig::default()
        .with_size(args.cols, args.rows)
        .with_timeout(args.timeout);

    let shell: Box<dyn Shell> = match &args.ssh {
        Some(destination) => {
            let (user, host) = split_destination(destination)?;
            let credential = args.credential()?;
            let shell = RemoteShell::connect(host, user, &credential, config)
                .await
                .with_context(|| format!("Failed to connect to {destination}"))?;
            Box::new(shell)
        }
        None => Box::new(LocalShell::with_config(config)),
    };

    let session = shell
        .interact(&args.command)
        .await
        .with_context(|| format!("Failed to start '{}'", args.command))?;
    info!(command = %args.command, remote = shell.is_remote(), "session started");

    let mut engine = Engine::new(session);
    engine
        .execute(commands)
        .await
        .context("Failed to execute script")?;

    if !args.wait_exit {
        return Ok(ExitCode::SUCCESS);
    }
    let status = engine
        .wait_exit_status(Some(args.timeout))
        .await
        .context("Command did not exit")?;
    info!(?status, "command exited");
    Ok(match status {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}
