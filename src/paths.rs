//! Paths on whichever machine a [`Shell`] runs its commands.
//!
//! Every operation is carried out by running a command through the shell,
//! so the same code works for local and remote files.

use crate::error::{Error, Result};
use crate::session::Session;
use crate::shell::{Shell, run_checked, shell_quote};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Content is written in pieces of at most this many bytes, each passed
/// as one command-line argument.
const WRITE_CHUNK: usize = 16 * 1024;

/// Turns off the terminal's `\n` to `\r\n` translation where there is a
/// terminal, so file bytes come through unchanged.
const RAW_OUTPUT: &str = "stty -onlcr 2>/dev/null;";

/// `stat -c` format matching the fields of [`FileStat`].
const STAT_FORMAT: &str = "%f %i %d %h %u %g %s %X %Y %Z";

const MODE_TYPE_MASK: u32 = 0o170_000;
const MODE_DIR: u32 = 0o040_000;
const MODE_FILE: u32 = 0o100_000;

/// File metadata as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub mode: u32,
    pub inode: u64,
    pub device: u64,
    pub links: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Seconds since the epoch.
    pub accessed: i64,
    pub modified: i64,
    pub changed: i64,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_DIR
    }

    pub fn is_file(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_FILE
    }

    /// Permission bits, e.g. `0o644`.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    fn parse(text: &str) -> Option<Self> {
        let mut fields = text.split_whitespace();
        let mut next = || fields.next();
        Some(FileStat {
            mode: u32::from_str_radix(next()?, 16).ok()?,
            inode: next()?.parse().ok()?,
            device: next()?.parse().ok()?,
            links: next()?.parse().ok()?,
            uid: next()?.parse().ok()?,
            gid: next()?.parse().ok()?,
            size: next()?.parse().ok()?,
            accessed: next()?.parse().ok()?,
            modified: next()?.parse().ok()?,
            changed: next()?.parse().ok()?,
        })
    }
}

/// A POSIX path, bound to the shell that can reach it.
#[derive(Clone, Copy)]
pub struct ShellPath<'a> {
    shell: &'a dyn Shell,
    path: &'a str,
}

/// An owned path on a shell, as returned by [`ShellPath::join`] and
/// [`ShellPath::parent`].
#[derive(Clone)]
pub struct ShellPathBuf<'a> {
    shell: &'a dyn Shell,
    path: String,
}

impl<'a> ShellPathBuf<'a> {
    pub fn as_path(&self) -> ShellPath<'_> {
        ShellPath {
            shell: self.shell,
            path: &self.path,
        }
    }
}

impl fmt::Display for ShellPathBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.as_path(), f)
    }
}

impl fmt::Debug for ShellPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShellPath({self})")
    }
}

/// `user@host:path` for remote shells, the bare path otherwise.
impl fmt::Display for ShellPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shell.endpoint() {
            Some(endpoint) => write!(f, "{}:{}", endpoint.login(), self.path),
            None => f.write_str(self.path),
        }
    }
}

impl<'a> ShellPath<'a> {
    pub fn new(shell: &'a dyn Shell, path: &'a str) -> Self {
        ShellPath { shell, path }
    }

    pub fn shell(&self) -> &'a dyn Shell {
        self.shell
    }

    /// The path as the shell itself sees it.
    pub fn as_str(&self) -> &'a str {
        self.path
    }

    pub fn is_remote(&self) -> bool {
        self.shell.is_remote()
    }

    /// `rel` appended to this path; an absolute `rel` replaces it.
    pub fn join(&self, rel: &str) -> ShellPathBuf<'a> {
        let path = if rel.starts_with('/') {
            rel.to_string()
        } else {
            format!("{}/{}", self.path.trim_end_matches('/'), rel)
        };
        ShellPathBuf {
            shell: self.shell,
            path,
        }
    }

    /// The containing directory: `/` for top-level entries, `.` for bare names.
    pub fn parent(&self) -> ShellPathBuf<'a> {
        let trimmed = self.path.trim_end_matches('/');
        let path = match trimmed.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
            None if self.path.starts_with('/') => "/".to_string(),
            None => ".".to_string(),
        };
        ShellPathBuf {
            shell: self.shell,
            path,
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        self.test("-e").await
    }

    pub async fn is_file(&self) -> Result<bool> {
        self.test("-f").await
    }

    pub async fn is_dir(&self) -> Result<bool> {
        self.test("-d").await
    }

    async fn test(&self, flag: &str) -> Result<bool> {
        let status = self
            .shell
            .exec_status_only(&format!("test {flag} {}", shell_quote(self.path)))
            .await?;
        Ok(status == Some(0))
    }

    /// Create the directory and any missing parents.
    pub async fn mkdir(&self) -> Result<()> {
        self.shell.mkdir(self.path).await
    }

    /// Names of the entries in this directory, hidden ones included.
    pub async fn list_dir(&self) -> Result<Vec<String>> {
        let listing = self.capture(&format!("ls -1A -- {}", shell_quote(self.path))).await?;
        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// The file's bytes, unaltered by the terminal.
    pub async fn read_bytes(&self) -> Result<Vec<u8>> {
        self.capture(&format!("cat -- {}", shell_quote(self.path))).await
    }

    pub async fn read_contents(&self) -> Result<String> {
        let bytes = self.read_bytes().await?;
        String::from_utf8(bytes).map_err(|err| {
            Error::InvalidArgument(format!("{self} is not valid UTF-8: {err}"))
        })
    }

    /// Replace the file's contents with `contents`.
    pub async fn write_contents(&self, contents: &str) -> Result<()> {
        let target = shell_quote(self.path);
        let mut redirect = ">";
        let mut rest = contents;
        loop {
            let mut split = rest.len().min(WRITE_CHUNK);
            while !rest.is_char_boundary(split) {
                split -= 1;
            }
            let (chunk, tail) = rest.split_at(split);
            let command = format!("printf '%s' {} {redirect} {target}", shell_quote(chunk));
            run_checked(self.shell, &command).await?;
            redirect = ">>";
            rest = tail;
            if rest.is_empty() {
                break;
            }
        }
        debug!(path = self.path, bytes = contents.len(), "wrote file");
        Ok(())
    }

    /// Move this path to `to` on the same shell.
    pub async fn rename(&self, to: &str) -> Result<()> {
        let command = format!("mv -- {} {}", shell_quote(self.path), shell_quote(to));
        run_checked(self.shell, &command).await.map(drop)
    }

    /// Remove the path, recursively for directories.
    pub async fn unlink(&self) -> Result<()> {
        let command = format!("rm -r -- {}", shell_quote(self.path));
        run_checked(self.shell, &command).await.map(drop)
    }

    pub async fn stat(&self) -> Result<FileStat> {
        let command = format!("stat -c {} -- {}", shell_quote(STAT_FORMAT), shell_quote(self.path));
        let output = run_checked(self.shell, &command).await?;
        FileStat::parse(&output.output).ok_or_else(|| Error::CommandFailed {
            command,
            status: output.status,
            output: output.output,
        })
    }

    pub async fn file_size(&self) -> Result<u64> {
        Ok(self.stat().await?.size)
    }

    /// Run `command` and return its raw output, failing on a non-zero exit.
    async fn capture(&self, command: &str) -> Result<Vec<u8>> {
        let command = format!("{RAW_OUTPUT} {command}");
        let channel = self.shell.open_channel(&command, false).await?;
        let mut session = Session::new(channel, self.shell.config().clone());
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = bytes.clone();
        session.on_output(move |data| {
            if let Ok(mut bytes) = sink.lock() {
                bytes.extend_from_slice(data);
            }
        });
        let status = session.wait_exit_status(None).await?;
        let transcript = session.transcript();
        session.close()?;
        if status != Some(0) {
            return Err(Error::CommandFailed {
                command,
                status,
                output: transcript,
            });
        }
        let bytes = bytes
            .lock()
            .map(|mut bytes| std::mem::take(&mut *bytes))
            .map_err(|_| Error::Channel("output buffer poisoned".to_string()))?;
        Ok(bytes)
    }
}
