//! The [`ScriptCommand`] trait and the [`Context`] type commands receive when executed.

use crate::reader::OutputHandler;
use crate::session::Session;
use crate::target::{ExpectOutcome, Target};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// How often output is pulled through while a command is pausing.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Execution context passed to [`ScriptCommand::execute`].
///
/// Owns the session being driven and the output handler annotations are
/// written to. The session echoes program output through the same handler.
pub struct Context {
    pub(crate) session: Session,
    pub(crate) output_handler: OutputHandler,
}

impl Context {
    pub(crate) fn new(mut session: Session, output_handler: OutputHandler) -> Self {
        let echo = output_handler.clone();
        session.on_output(move |data| echo(data));
        Context {
            session,
            output_handler,
        }
    }

    /// Write raw bytes to the program's input.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        Ok(self.session.send(data)?)
    }

    /// Write a line of text followed by a newline.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        Ok(self.session.send_line(line)?)
    }

    /// Pass bytes through the output handler (e.g. to stdout or a custom sink).
    pub fn emit(&self, data: &[u8]) {
        (self.output_handler)(data);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Pause for `duration` while still echoing whatever the program prints.
    pub async fn idle(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now().checked_add(duration);
        loop {
            self.session.poll()?;
            let remaining = deadline.map_or(IDLE_POLL, |deadline| {
                deadline.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                return Ok(());
            }
            sleep(IDLE_POLL.min(remaining)).await;
        }
    }

    /// Keep reading until the program has printed nothing for `quiet`, or its
    /// output has ended. Gives up after the session's default timeout.
    pub async fn settle(&mut self, quiet: Duration) -> Result<()> {
        let limit = self.session.config().timeout;
        let started = Instant::now();
        let mut last_output = started;
        loop {
            let poll = self.session.poll()?;
            let now = Instant::now();
            if poll.received {
                last_output = now;
            }
            if poll.ended || now.duration_since(last_output) >= quiet {
                return Ok(());
            }
            if now.duration_since(started) >= limit {
                return Err(anyhow!(
                    "Timeout after {:?} waiting for {:?} without output",
                    limit,
                    quiet
                ));
            }
            sleep(IDLE_POLL.min(quiet)).await;
        }
    }

    /// Wait for the program to finish and return its exit status, if one was
    /// reported.
    pub async fn wait_exit(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        let timeout = timeout.unwrap_or(self.session.config().timeout);
        let status = self
            .session
            .wait_exit_status(Some(timeout))
            .await
            .map_err(|err| anyhow!("Program did not exit: {err}"))?;
        info!(?status, "program exited");
        Ok(status)
    }

    /// Wait for one of `targets` and return the index of the one that matched.
    ///
    /// Without a `timeout` the session's configured default applies. Running
    /// out of time or output is an error.
    pub async fn expect(&mut self, targets: &[Target], timeout: Option<Duration>) -> Result<usize> {
        let timeout = timeout.unwrap_or(self.session.config().timeout);
        match self.session.expect(targets, timeout).await? {
            ExpectOutcome::Matched(found) => {
                info!(index = found.index, text = %found.text, "matched");
                debug!(before = %found.before, "output before match");
                Ok(found.index)
            }
            ExpectOutcome::Ended => Err(anyhow!(
                "Output ended before any of {:?} appeared",
                targets
            )),
            ExpectOutcome::TimedOut => Err(anyhow!(
                "Timeout after {:?} waiting for {:?}",
                timeout,
                targets
            )),
        }
    }
}

/// A single script command.
///
/// Implement this trait to add a new command to the engine. Then:
///
/// 1. Define `pub const NAME: &'static str` on your struct, the script
///    keyword (e.g. `"type"`, `"expect"`) used by the parser.
/// 2. Re-export the struct from `src/commands/mod.rs`.
/// 3. Add one entry to the `REGISTRY` in [`crate::parser`]:
///    `(MyCmd::NAME, MyCmd::parse_boxed)`.
#[async_trait(?Send)]
pub trait ScriptCommand: 'static {
    /// The command name, accessible at runtime through a trait object.
    ///
    /// Implementations should return their `NAME` constant:
    /// `fn name(&self) -> &'static str { Self::NAME }`.
    fn name(&self) -> &'static str;

    /// Parse this command from the argument string (everything after the
    /// command keyword on the script line).
    fn parse(args: &str) -> Result<Self>
    where
        Self: Sized;

    /// Parse and box this command. Used as the function-pointer type stored in
    /// the command registry.
    fn parse_boxed(args: &str) -> Result<Box<dyn ScriptCommand>>
    where
        Self: Sized,
    {
        Ok(Box::new(Self::parse(args)?))
    }

    /// Execute the command using the provided engine context.
    async fn execute(&self, ctx: &mut Context) -> Result<()>;
}
