use super::pty_reader::spawn_reader;
use super::{Channel, Chunk};
use crate::error::{Error, Result};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Write};
use std::sync::mpsc::{Receiver, TryRecvError};
use tracing::{debug, warn};

/// A local command running inside a pseudo-terminal.
pub struct PtyChannel {
    #[allow(dead_code)]
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Option<Box<dyn Write + Send>>,
    output_rx: Receiver<io::Result<Vec<u8>>>,
    exit_status: Option<i32>,
}

impl PtyChannel {
    /// Run `command` through the platform shell in a new PTY of the given size.
    pub fn spawn(command: &str, cols: u16, rows: u16) -> Result<Self> {
        let spawn_error = |reason: String| Error::Spawn {
            command: command.to_string(),
            reason,
        };

        let pty_system = portable_pty::native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| spawn_error(format!("failed to open PTY: {err}")))?;

        let child = pair
            .slave
            .spawn_command(shell_command(command))
            .map_err(|err| spawn_error(err.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|err| spawn_error(format!("failed to get PTY writer: {err}")))?;

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| spawn_error(format!("failed to get PTY reader: {err}")))?;

        debug!(command, pid = ?child.process_id(), "spawned local command");

        // The slave end is dropped with `pair` so the master sees the hangup
        // once the child exits.
        Ok(PtyChannel {
            master: pair.master,
            child,
            writer: Some(writer),
            output_rx: spawn_reader(reader),
            exit_status: None,
        })
    }

    fn poll_child(&mut self) -> Option<i32> {
        if self.exit_status.is_none() {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_status = Some(status.exit_code() as i32);
            }
        }
        self.exit_status
    }
}

fn shell_command(command: &str) -> CommandBuilder {
    #[cfg(windows)]
    let (shell, flag) = ("cmd", "/C");
    #[cfg(not(windows))]
    let (shell, flag) = ("sh", "-c");

    let mut cmd = CommandBuilder::new(shell);
    cmd.arg(flag);
    cmd.arg(command);
    if let Ok(cwd) = std::env::current_dir() {
        cmd.cwd(cwd);
    }
    cmd
}

impl Channel for PtyChannel {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Channel("write to a closed channel".to_string()))?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn try_read(&mut self) -> Result<Chunk> {
        match self.output_rx.try_recv() {
            Ok(Ok(data)) => Ok(Chunk::Data(data)),
            Ok(Err(err)) => Err(Error::channel(err)),
            Err(TryRecvError::Empty) => Ok(Chunk::Pending),
            Err(TryRecvError::Disconnected) => Ok(Chunk::Closed),
        }
    }

    fn exit_status(&mut self) -> Option<i32> {
        self.poll_child()
    }

    fn close(&mut self) -> Result<()> {
        self.writer = None;
        if self.poll_child().is_none() {
            debug!("killing local command that is still running");
            match self.child.kill() {
                Ok(()) => match self.child.wait() {
                    Ok(status) => self.exit_status = Some(status.exit_code() as i32),
                    Err(err) => warn!(error = %err, "failed to reap local command"),
                },
                Err(err) => {
                    warn!(error = %err, "failed to kill local command");
                    self.poll_child();
                }
            }
        }
        Ok(())
    }
}
