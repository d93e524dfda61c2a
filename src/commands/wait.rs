//! [`Wait`] command: pauses until time passes, output goes quiet, or the
//! program exits.
//!
//! Script syntax: `wait 500ms`, `wait quiet 300ms`, `wait exit [10s]`

use crate::command::{Context, ScriptCommand};
use crate::parser::parse_duration;
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Holds the script back while program output keeps being echoed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wait {
    /// A fixed pause.
    For(Duration),
    /// Until nothing has been printed for the given time.
    Quiet(Duration),
    /// Until the program exits. A non-zero status fails the script.
    Exit(Option<Duration>),
}

impl Wait {
    pub const NAME: &'static str = "wait";
}

#[async_trait(?Send)]
impl ScriptCommand for Wait {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let args = args.trim();
        let (word, rest) = args.split_once(' ').unwrap_or((args, ""));
        match word {
            "quiet" => Ok(Wait::Quiet(parse_duration(rest)?)),
            "exit" if rest.trim().is_empty() => Ok(Wait::Exit(None)),
            "exit" => Ok(Wait::Exit(Some(parse_duration(rest)?))),
            _ => Ok(Wait::For(parse_duration(args)?)),
        }
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        match self {
            Wait::For(duration) => ctx.idle(*duration).await,
            Wait::Quiet(quiet) => ctx.settle(*quiet).await,
            Wait::Exit(timeout) => match ctx.wait_exit(*timeout).await? {
                Some(0) => Ok(()),
                Some(status) => bail!("Program exited with status {}", status),
                None => {
                    warn!("program ended without reporting an exit status");
                    Ok(())
                }
            },
        }
    }
}
