//! Local and remote shells: one interface for running commands and opening
//! interactive sessions, wherever the command executes.

use crate::channel::{Channel, Credential, PtyChannel, SshConnection, split_host};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::id::{Identity, parse_id};
use crate::session::Session;
use async_trait::async_trait;
use tracing::{debug, info};

/// Exit status and rendered output of a command run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the command's status never became known.
    pub status: Option<i32>,
    pub output: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// The login a remote shell runs its commands under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// `user@host`, as ssh and rsync expect it.
    pub fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Quote `arg` for a POSIX shell.
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Somewhere commands can run.
#[async_trait]
pub trait Shell: Send + Sync {
    fn config(&self) -> &SessionConfig;

    fn is_remote(&self) -> bool;

    /// Where commands run, for shells on another machine.
    fn endpoint(&self) -> Option<Endpoint> {
        None
    }

    /// Start `command`. Interactive channels get a pseudo-terminal where the
    /// transport makes that optional.
    async fn open_channel(&self, command: &str, interactive: bool) -> Result<Box<dyn Channel>>;

    /// Start `command` and hand back a session for the caller to drive with
    /// `expect`.
    async fn interact(&self, command: &str) -> Result<Session> {
        let channel = self.open_channel(command, true).await?;
        Ok(Session::new(channel, self.config().clone()))
    }

    /// Run `command` to completion and collect its output.
    async fn run(&self, command: &str) -> Result<RunOutput> {
        let channel = self.open_channel(command, false).await?;
        let mut session = Session::new(channel, self.config().clone());
        let status = session.wait_exit_status(None).await?;
        let output = session.transcript();
        session.close()?;
        debug!(command, ?status, "command finished");
        Ok(RunOutput { status, output })
    }

    async fn exec_status_only(&self, command: &str) -> Result<Option<i32>> {
        Ok(self.run(command).await?.status)
    }

    async fn path_exists(&self, path: &str) -> Result<bool> {
        let status = self
            .exec_status_only(&format!("ls -1 {}", shell_quote(path)))
            .await?;
        Ok(status == Some(0))
    }

    /// Create `path` and any missing parents.
    async fn mkdir(&self, path: &str) -> Result<()> {
        run_checked(self, &format!("mkdir -p {}", shell_quote(path)))
            .await
            .map(drop)
    }

    /// Apply `mode` (octal or symbolic) to `path`.
    async fn chmod(&self, path: &str, mode: &str) -> Result<()> {
        run_checked(self, &format!("chmod {} {}", shell_quote(mode), shell_quote(path)))
            .await
            .map(drop)
    }

    /// Size of a file in bytes.
    async fn file_size(&self, path: &str) -> Result<u64> {
        let command = format!("stat -c %s {}", shell_quote(path));
        let output = run_checked(self, &command).await?;
        parse_leading_number(&command, &output)
    }

    /// Disk usage of a directory in bytes, at kilobyte granularity.
    async fn dir_size(&self, path: &str) -> Result<u64> {
        let command = format!("du -sk {}", shell_quote(path));
        let output = run_checked(self, &command).await?;
        Ok(parse_leading_number(&command, &output)? * 1024)
    }

    /// The user and groups commands run as, from `id`.
    async fn identity(&self) -> Result<Identity> {
        let output = run_checked(self, "id").await?;
        parse_id(&output.output)
    }
}

pub(crate) async fn run_checked<S: Shell + ?Sized>(shell: &S, command: &str) -> Result<RunOutput> {
    let output = shell.run(command).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(Error::CommandFailed {
            command: command.to_string(),
            status: output.status,
            output: output.output,
        })
    }
}

fn parse_leading_number(command: &str, output: &RunOutput) -> Result<u64> {
    output
        .output
        .split_whitespace()
        .next()
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| Error::CommandFailed {
            command: command.to_string(),
            status: output.status,
            output: output.output.clone(),
        })
}

/// Runs commands on this machine, each in its own pseudo-terminal.
#[derive(Debug, Clone, Default)]
pub struct LocalShell {
    config: SessionConfig,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: SessionConfig) -> Self {
        LocalShell { config }
    }
}

#[async_trait]
impl Shell for LocalShell {
    fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn open_channel(&self, command: &str, _interactive: bool) -> Result<Box<dyn Channel>> {
        let channel = PtyChannel::spawn(command, self.config.cols, self.config.rows)?;
        Ok(Box::new(channel))
    }
}

/// Runs commands on a remote host over one authenticated SSH connection.
pub struct RemoteShell {
    connection: SshConnection,
    config: SessionConfig,
}

impl RemoteShell {
    /// Connect to `host` (`name` or `name:port`) as `user`.
    pub async fn connect(
        host: &str,
        user: &str,
        credential: &Credential,
        config: SessionConfig,
    ) -> Result<Self> {
        let connection = SshConnection::connect(host, user, credential).await?;
        info!(host, user, "connected");
        Ok(RemoteShell { connection, config })
    }

    pub fn hostname(&self) -> &str {
        self.connection.host()
    }

    pub fn username(&self) -> &str {
        self.connection.user()
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }
}

#[async_trait]
impl Shell for RemoteShell {
    fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn endpoint(&self) -> Option<Endpoint> {
        let (host, port) = split_host(self.hostname());
        Some(Endpoint {
            user: self.username().to_string(),
            host: host.to_string(),
            port,
        })
    }

    async fn open_channel(&self, command: &str, interactive: bool) -> Result<Box<dyn Channel>> {
        let pty = interactive.then_some((self.config.cols, self.config.rows));
        let channel = self.connection.open_channel(command, pty).await?;
        Ok(Box::new(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockShell, ScriptedChannel};

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote("$HOME dir"), "'$HOME dir'");
    }

    #[tokio::test]
    async fn test_run_collects_output_and_status() {
        let shell = MockShell::new().on("echo hi", || {
            ScriptedChannel::new().data("hi\r\n").close().exit_with(0)
        });
        let output = shell.run("echo hi").await.unwrap();
        assert_eq!(output, RunOutput { status: Some(0), output: "hi".into() });
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_path_exists() {
        let shell = MockShell::new()
            .on("ls -1 '/etc'", || ScriptedChannel::new().close().exit_with(0))
            .on("ls -1 '/nope'", || ScriptedChannel::new().close().exit_with(2));
        assert!(shell.path_exists("/etc").await.unwrap());
        assert!(!shell.path_exists("/nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_mkdir_failure_is_reported() {
        let shell = MockShell::new().on("mkdir -p '/root/x'", || {
            ScriptedChannel::new()
                .data("mkdir: cannot create directory\r\n")
                .close()
                .exit_with(1)
        });
        let err = shell.mkdir("/root/x").await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_chmod_command() {
        let shell = MockShell::new().on("chmod '755' '/tmp/run.sh'", || {
            ScriptedChannel::new().close().exit_with(0)
        });
        shell.chmod("/tmp/run.sh", "755").await.unwrap();
        assert_eq!(shell.history(), vec!["chmod '755' '/tmp/run.sh'"]);
    }

    #[tokio::test]
    async fn test_sizes() {
        let shell = MockShell::new()
            .on("stat -c %s '/tmp/f'", || {
                ScriptedChannel::new().data("1234\r\n").close().exit_with(0)
            })
            .on("du -sk '/tmp/d'", || {
                ScriptedChannel::new().data("8\t/tmp/d\r\n").close().exit_with(0)
            });
        assert_eq!(shell.file_size("/tmp/f").await.unwrap(), 1234);
        assert_eq!(shell.dir_size("/tmp/d").await.unwrap(), 8 * 1024);
    }

    #[tokio::test]
    async fn test_unparseable_size() {
        let shell = MockShell::new().on("stat -c %s '/tmp/f'", || {
            ScriptedChannel::new().data("garbage\r\n").close().exit_with(0)
        });
        assert!(matches!(
            shell.file_size("/tmp/f").await,
            Err(Error::CommandFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_interact_returns_live_session() {
        let shell = MockShell::new().on("bash", || {
            ScriptedChannel::new().data("[me@box ~]$ ").stall()
        });
        let mut session = shell.interact("bash").await.unwrap();
        let index = session
            .expect_index(&[crate::Target::prompt()], std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(index, 0);
        assert!(!session.is_ended());
    }

    #[tokio::test]
    async fn test_identity() {
        let shell = MockShell::new().on("id", || {
            ScriptedChannel::new()
                .data("uid=1000(deploy) gid=1000(deploy) groups=1000(deploy),27(sudo)\r\n")
                .close()
                .exit_with(0)
        });
        let identity = shell.identity().await.unwrap();
        assert_eq!(identity.user.name.as_deref(), Some("deploy"));
        assert!(identity.in_group("sudo"));
    }

    #[test]
    fn test_endpoint_login() {
        let endpoint = Endpoint {
            user: "deploy".into(),
            host: "build.example.com".into(),
            port: 2222,
        };
        assert_eq!(endpoint.login(), "deploy@build.example.com");
    }

    #[tokio::test]
    async fn test_unknown_command_fails_to_spawn() {
        let shell = MockShell::new();
        assert!(matches!(shell.run("true").await, Err(Error::Spawn { .. })));
    }
}
