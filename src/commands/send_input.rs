//! [`SendInput`] command: sends a line to the program's input instantly.
//!
//! Script syntax: `send "text here"`

use crate::command::{Context, ScriptCommand};
use crate::parser::parse_quoted_string;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Sends a line to the program immediately, without simulated typing.
///
/// A newline is appended so the program receives a complete line.
pub struct SendInput {
    pub line: String,
}

impl SendInput {
    pub const NAME: &'static str = "send";

    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }
}

#[async_trait(?Send)]
impl ScriptCommand for SendInput {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        Ok(Self::new(parse_quoted_string(args)?))
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        ctx.write_line(&self.line)?;
        // Give the program a moment to process the input.
        ctx.idle(Duration::from_millis(50)).await
    }
}
