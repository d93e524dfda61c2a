//! Copying files and directories between shells with rsync.
//!
//! The rsync command runs on one of the two shells: the shared machine when
//! both paths are on it, otherwise the source shell, or the destination
//! shell when only the source is remote. Progress is read off rsync's
//! `--progress` output as it streams in.

use crate::error::{Error, Result};
use crate::paths::ShellPath;
use crate::session::Session;
use crate::shell::{Endpoint, Shell, shell_quote};
use crate::target::{ExpectOutcome, Target};
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// rsync's "some files vanished before they could be transferred".
const EXIT_VANISHED: i32 = 24;

const DEFAULT_PORT: u16 = 22;

static PROGRESS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(\d+)\s+(\d+)%\s+\S+/s\s+[0-9:]+(?:\s+\((?:xfer|xfr)#\d+,\s*(?:to-check|to-chk|ir-chk)=(\d+)/(\d+)\))?",
    )
    .expect("progress expression is valid")
});

static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"total size is (\d+)\s+speedup is ([\d.]+)").expect("summary expression is valid")
});

/// One update read from rsync's output.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// Bytes of the file currently being sent.
    File { bytes: u64, percent: u8 },
    /// Files still to check, out of the total known so far.
    Files { remaining: u64, total: u64 },
    /// The closing summary.
    Finished { total_size: u64, speedup: f64 },
}

/// Splits raw rsync output into lines at `\r` and `\n` and picks out
/// progress updates.
#[derive(Debug, Default)]
pub struct ProgressParser {
    pending: String,
}

impl ProgressParser {
    pub fn feed(&mut self, data: &[u8]) -> Vec<Progress> {
        self.pending.push_str(&String::from_utf8_lossy(data));
        let mut updates = Vec::new();
        while let Some(end) = self.pending.find(['\r', '\n']) {
            let line: String = self.pending.drain(..=end).collect();
            parse_line(&line[..end], &mut updates);
        }
        updates
    }
}

fn parse_line(line: &str, updates: &mut Vec<Progress>) {
    if let Some(caps) = PROGRESS_LINE.captures(line) {
        let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
        if let (Some(bytes), Some(percent)) = (number(1), number(2)) {
            updates.push(Progress::File {
                bytes,
                percent: percent.min(100) as u8,
            });
        }
        if let (Some(remaining), Some(total)) = (number(3), number(4)) {
            updates.push(Progress::Files { remaining, total });
        }
    } else if let Some(caps) = SUMMARY_LINE.captures(line) {
        if let (Ok(total_size), Ok(speedup)) = (caps[1].parse(), caps[2].parse()) {
            updates.push(Progress::Finished {
                total_size,
                speedup,
            });
        }
    }
}

/// Builds an rsync command line. Every value is shell-quoted.
#[derive(Debug, Clone)]
pub struct RsyncCommand {
    flags: String,
    remote_rsync: Option<String>,
    remote_shell: Option<String>,
    exclusions: Vec<String>,
    progress: bool,
    delete: bool,
}

impl Default for RsyncCommand {
    fn default() -> Self {
        RsyncCommand {
            flags: "az".to_string(),
            remote_rsync: None,
            remote_shell: None,
            exclusions: Vec::new(),
            progress: true,
            delete: false,
        }
    }
}

impl RsyncCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short flags without the leading dash, e.g. `az`.
    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = flags.into();
        self
    }

    /// The rsync to run on the far side, e.g. `sudo rsync`.
    pub fn remote_rsync(mut self, command: Option<String>) -> Self {
        self.remote_rsync = command;
        self
    }

    /// The `-e` transport command.
    pub fn remote_shell(mut self, command: Option<String>) -> Self {
        self.remote_shell = command;
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Remove destination files that are missing from the source.
    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn build(&self, source: &str, destination: &str) -> String {
        let mut args = vec!["rsync".to_string()];
        if let Some(remote) = &self.remote_rsync {
            args.push(format!("--rsync-path={}", shell_quote(remote)));
        }
        if let Some(rsh) = &self.remote_shell {
            args.push(format!("-e {}", shell_quote(rsh)));
        }
        if !self.flags.is_empty() {
            args.push(format!("-{}", self.flags));
        }
        if self.progress {
            args.push("--no-human-readable --progress".to_string());
        }
        if self.delete {
            args.push("--delete".to_string());
        }
        args.extend(
            self.exclusions
                .iter()
                .map(|pattern| format!("--exclude={}", shell_quote(pattern))),
        );
        args.push(shell_quote(source));
        args.push(shell_quote(destination));
        args.join(" ")
    }
}

/// The transport rsync uses to reach `endpoint`.
fn ssh_command(endpoint: &Endpoint, identity: Option<&PathBuf>) -> String {
    let mut rsh = "ssh -oStrictHostKeyChecking=no".to_string();
    if let Some(identity) = identity {
        rsh.push_str(&format!(" -i {}", identity.display()));
    }
    if endpoint.port != DEFAULT_PORT {
        rsh.push_str(&format!(" -p {}", endpoint.port));
    }
    rsh
}

/// Where and how a transfer runs.
struct Plan<'a> {
    shell: &'a dyn Shell,
    command: String,
    /// rsync has to log in to another machine and may ask for a password.
    crosses_hosts: bool,
}

/// Copies a file or directory from one shell's machine to another's.
///
/// ```no_run
/// use shellexpect::{LocalShell, Rsync, ShellPath};
///
/// # async fn demo(remote: &dyn shellexpect::Shell) -> shellexpect::Result<()> {
/// let local = LocalShell::new();
/// Rsync::new()
///     .exclude("*.tmp")
///     .transfer(
///         ShellPath::new(&local, "build/"),
///         ShellPath::new(remote, "/srv/app"),
///         |update| println!("{update:?}"),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Rsync {
    flags: Option<String>,
    delete: bool,
    exclusions: Vec<String>,
    identity: Option<PathBuf>,
    remote_rsync: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for Rsync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rsync")
            .field("flags", &self.flags)
            .field("delete", &self.delete)
            .field("exclusions", &self.exclusions)
            .field("identity", &self.identity)
            .field("remote_rsync", &self.remote_rsync)
            .field("password", &self.password.as_ref().map(|_| ".."))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Rsync {
    fn default() -> Self {
        Rsync {
            flags: None,
            delete: false,
            exclusions: Vec::new(),
            identity: None,
            remote_rsync: None,
            password: None,
            timeout: Duration::from_secs(3600),
        }
    }
}

impl Rsync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the short flags. Defaults to `czvP` for files and `aczvP`
    /// for directories.
    pub fn flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }

    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclusions.push(pattern.into());
        self
    }

    /// Private key ssh should use to reach the other machine.
    pub fn identity(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity = Some(path.into());
        self
    }

    /// rsync command on the far side, e.g. `sudo rsync`.
    pub fn remote_rsync(mut self, command: impl Into<String>) -> Self {
        self.remote_rsync = Some(command.into());
        self
    }

    /// Answer to an ssh password prompt.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Upper bound on the whole transfer.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Copy `source` to `destination`, reporting progress as it arrives.
    ///
    /// The destination's parent directory is created when missing. Exit
    /// status 24 (files vanished mid-transfer) counts as success.
    pub async fn transfer(
        &self,
        source: ShellPath<'_>,
        destination: ShellPath<'_>,
        on_progress: impl Fn(&Progress) + Send + Sync + 'static,
    ) -> Result<()> {
        let plan = self.plan(source, destination).await?;
        info!(command = %plan.command, "starting transfer");
        let mut session = plan.shell.interact(&plan.command).await?;

        let parser = Mutex::new(ProgressParser::default());
        session.on_output(move |data| {
            let updates = parser
                .lock()
                .map(|mut parser| parser.feed(data))
                .unwrap_or_default();
            for update in &updates {
                trace!(?update, "transfer progress");
                on_progress(update);
            }
        });

        if plan.crosses_hosts {
            self.answer_password(&mut session).await?;
        }

        let status = session.wait_exit_status(Some(self.timeout)).await?;
        match status {
            Some(0) => Ok(()),
            Some(EXIT_VANISHED) => {
                warn!("some source files vanished during the transfer");
                Ok(())
            }
            status => Err(Error::CommandFailed {
                command: plan.command,
                status,
                output: session.transcript(),
            }),
        }
    }

    async fn plan<'a>(&self, source: ShellPath<'a>, destination: ShellPath<'a>) -> Result<Plan<'a>> {
        let source_is_dir = source.is_dir().await?;
        if !source_is_dir && !source.is_file().await? {
            return Err(Error::InvalidArgument(format!("{source} does not exist")));
        }

        let parent = destination.parent();
        if !parent.as_path().is_dir().await? {
            debug!(%parent, "creating destination directory");
            parent.as_path().mkdir().await?;
        }
        let destination_is_dir = destination.is_dir().await?;

        let source_endpoint = source.shell().endpoint();
        let destination_endpoint = destination.shell().endpoint();
        let (shell, mut from, mut to, far_side) = if source_endpoint == destination_endpoint {
            (source.shell(), source.as_str().to_string(), destination.as_str().to_string(), None)
        } else if destination_endpoint.is_none() {
            (destination.shell(), source.to_string(), destination.as_str().to_string(), source_endpoint)
        } else {
            (source.shell(), source.as_str().to_string(), destination.to_string(), destination_endpoint)
        };
        if source_is_dir && !from.ends_with('/') {
            from.push('/');
        }
        if destination_is_dir && !to.ends_with('/') {
            to.push('/');
        }

        let default_flags = if source_is_dir { "aczvP" } else { "czvP" };
        let mut command = RsyncCommand::new()
            .flags(self.flags.as_deref().unwrap_or(default_flags))
            .delete(self.delete);
        for pattern in &self.exclusions {
            command = command.exclude(pattern.as_str());
        }
        if let Some(endpoint) = &far_side {
            command = command
                .remote_shell(Some(ssh_command(endpoint, self.identity.as_ref())))
                .remote_rsync(self.remote_rsync.clone());
        }

        Ok(Plan {
            shell,
            command: command.build(&from, &to),
            crosses_hosts: far_side.is_some(),
        })
    }

    /// Send the password if ssh asks for one before rsync starts talking.
    async fn answer_password(&self, session: &mut Session) -> Result<()> {
        let targets = [
            Target::Eof,
            Target::pattern(r"(?i)password:\s*$")?,
            Target::pattern(r"\n")?,
        ];
        let timeout = session.config().timeout;
        match session.expect(&targets, timeout).await? {
            ExpectOutcome::Matched(found) if found.index == 1 => {
                let password = self.password.as_deref().ok_or_else(|| {
                    Error::InvalidArgument("rsync asked for a password and none was given".to_string())
                })?;
                debug!("answering password prompt");
                session.send_line(password)
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockShell, ScriptedChannel};
    use std::sync::Arc;

    fn status(code: i32) -> impl Fn() -> ScriptedChannel + Send + Sync + 'static {
        move || ScriptedChannel::new().close().exit_with(code)
    }

    fn web1() -> Endpoint {
        Endpoint {
            user: "deploy".into(),
            host: "web1".into(),
            port: 2222,
        }
    }

    const RSYNC_OUTPUT: &str = "report.csv\r\n      32768  50%    1.00MB/s    0:00:00\r      65536 100%    2.00MB/s    0:00:00 (xfr#1, to-chk=0/1)\r\n\r\nsent 65,700 bytes  received 35 bytes\r\ntotal size is 65536  speedup is 0.99\r\n";

    #[test]
    fn test_command_line() {
        let command = RsyncCommand::new()
            .flags("aczvP")
            .remote_rsync(Some("sudo rsync".into()))
            .remote_shell(Some("ssh -oStrictHostKeyChecking=no".into()))
            .delete(true)
            .exclude("*.log")
            .build("src/", "deploy@web1:/srv/app/");
        assert_eq!(
            command,
            "rsync --rsync-path='sudo rsync' -e 'ssh -oStrictHostKeyChecking=no' -aczvP \
             --no-human-readable --progress --delete --exclude='*.log' 'src/' 'deploy@web1:/srv/app/'"
        );

        let quiet = RsyncCommand::new().progress(false).build("a", "b");
        assert_eq!(quiet, "rsync -az 'a' 'b'");
    }

    #[test]
    fn test_ssh_command() {
        assert_eq!(
            ssh_command(&web1(), Some(&PathBuf::from("/keys/id_ed25519"))),
            "ssh -oStrictHostKeyChecking=no -i /keys/id_ed25519 -p 2222"
        );
        let mut standard = web1();
        standard.port = 22;
        assert_eq!(ssh_command(&standard, None), "ssh -oStrictHostKeyChecking=no");
    }

    #[test]
    fn test_progress_updates() {
        let mut parser = ProgressParser::default();
        let (head, tail) = RSYNC_OUTPUT.as_bytes().split_at(30);
        let mut updates = parser.feed(head);
        updates.extend(parser.feed(tail));
        assert_eq!(
            updates,
            [
                Progress::File { bytes: 32768, percent: 50 },
                Progress::File { bytes: 65536, percent: 100 },
                Progress::Files { remaining: 0, total: 1 },
                Progress::Finished { total_size: 65536, speedup: 0.99 },
            ]
        );
    }

    #[test]
    fn test_progress_waits_for_line_end() {
        let mut parser = ProgressParser::default();
        assert!(parser.feed(b"      4096  10%  100.00kB/s").is_empty());
        assert_eq!(
            parser.feed(b"    0:00:09\r"),
            [Progress::File { bytes: 4096, percent: 10 }]
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let text = format!("{:?}", Rsync::new().password("hunter2"));
        assert!(!text.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_local_file_transfer() {
        let command = "rsync -czvP --no-human-readable --progress '/data/report.csv' '/backup/report.csv'";
        let shell = MockShell::new()
            .on("test -d '/data/report.csv'", status(1))
            .on("test -f '/data/report.csv'", status(0))
            .on("test -d '/backup'", status(0))
            .on("test -d '/backup/report.csv'", status(1))
            .on(command, || ScriptedChannel::new().data(RSYNC_OUTPUT).close().exit_with(0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        Rsync::new()
            .transfer(
                ShellPath::new(&shell, "/data/report.csv"),
                ShellPath::new(&shell, "/backup/report.csv"),
                move |update| sink.lock().unwrap().push(update.clone()),
            )
            .await
            .unwrap();

        assert_eq!(shell.history().last().map(String::as_str), Some(command));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[3], Progress::Finished { total_size: 65536, .. }));
    }

    #[tokio::test]
    async fn test_directory_push_to_remote() {
        let local = MockShell::new()
            .on("test -d 'site'", status(0))
            .on(
                "rsync -e 'ssh -oStrictHostKeyChecking=no -p 2222' -aczvP --no-human-readable \
                 --progress --exclude='*.tmp' 'site/' 'deploy@web1:/srv/www/'",
                || {
                    ScriptedChannel::new()
                        .data("deploy@web1's password: ")
                        .delay(Duration::from_millis(20))
                        .data("\r\nsending incremental file list\r\n")
                        .close()
                        .exit_with(0)
                },
            );
        let remote = MockShell::new()
            .remote(web1())
            .on("test -d '/srv'", status(1))
            .on("mkdir -p '/srv'", status(0))
            .on("test -d '/srv/www'", status(0));

        Rsync::new()
            .exclude("*.tmp")
            .password("hunter2")
            .transfer(
                ShellPath::new(&local, "site"),
                ShellPath::new(&remote, "/srv/www"),
                |_| {},
            )
            .await
            .unwrap();
        assert!(remote.history().contains(&"mkdir -p '/srv'".to_string()));
    }

    #[tokio::test]
    async fn test_pull_runs_on_the_local_side() {
        let local = MockShell::new()
            .on("test -d '/tmp'", status(0))
            .on("test -d '/tmp/app.log'", status(1))
            .on(
                "rsync -e 'ssh -oStrictHostKeyChecking=no -p 2222' -czvP --no-human-readable \
                 --progress 'deploy@web1:/var/log/app.log' '/tmp/app.log'",
                || ScriptedChannel::new().data("app.log\r\n").close().exit_with(0),
            );
        let remote = MockShell::new()
            .remote(web1())
            .on("test -d '/var/log/app.log'", status(1))
            .on("test -f '/var/log/app.log'", status(0));

        Rsync::new()
            .transfer(
                ShellPath::new(&remote, "/var/log/app.log"),
                ShellPath::new(&local, "/tmp/app.log"),
                |_| {},
            )
            .await
            .unwrap();
        assert!(local.history().last().unwrap().starts_with("rsync "));
    }

    #[tokio::test]
    async fn test_password_prompt_without_password() {
        let local = MockShell::new()
            .on("test -d 'a.txt'", status(1))
            .on("test -f 'a.txt'", status(0))
            .on(
                "rsync -e 'ssh -oStrictHostKeyChecking=no -p 2222' -czvP --no-human-readable \
                 --progress 'a.txt' 'deploy@web1:/tmp/a.txt'",
                || ScriptedChannel::new().data("deploy@web1's password: ").stall(),
            );
        let remote = MockShell::new()
            .remote(web1())
            .on("test -d '/tmp'", status(0))
            .on("test -d '/tmp/a.txt'", status(1));

        let err = Rsync::new()
            .transfer(
                ShellPath::new(&local, "a.txt"),
                ShellPath::new(&remote, "/tmp/a.txt"),
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_missing_source() {
        let shell = MockShell::new()
            .on("test -d '/nope'", status(1))
            .on("test -f '/nope'", status(1));
        let err = Rsync::new()
            .transfer(ShellPath::new(&shell, "/nope"), ShellPath::new(&shell, "/tmp/x"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_failed_transfer_reports_status() {
        let command = "rsync -czvP --no-human-readable --progress 'a' 'b'";
        let shell = MockShell::new()
            .on("test -d 'a'", status(1))
            .on("test -f 'a'", status(0))
            .on("test -d '.'", status(0))
            .on("test -d 'b'", status(1))
            .on(command, || {
                ScriptedChannel::new()
                    .data("rsync error: some files could not be transferred (code 23)\r\n")
                    .close()
                    .exit_with(23)
            });
        let err = Rsync::new()
            .transfer(ShellPath::new(&shell, "a"), ShellPath::new(&shell, "b"), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: Some(23), .. }));
    }
}
