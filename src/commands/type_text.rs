//! [`TypeText`] command: simulates human typing character by character.
//!
//! Script syntax: `type "text here"`

use crate::command::{Context, ScriptCommand};
use crate::parser::parse_quoted_string;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

/// Sends `text` to the program one character at a time with random
/// per-character delays, then submits the line with a newline.
///
/// The terminal's own echo produces the visible output, so each character
/// appears exactly once regardless of the delay.
pub struct TypeText {
    pub text: String,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl TypeText {
    pub const NAME: &'static str = "type";

    /// Create a `TypeText` command with default timing (50-150 ms per character).
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_timing(text, Duration::from_millis(50), Duration::from_millis(150))
    }

    /// Create a `TypeText` command with custom per-character timing.
    pub fn with_timing(text: impl Into<String>, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            text: text.into(),
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    fn next_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let millis = rng.gen_range(self.min_delay.as_millis()..=self.max_delay.as_millis());
        Duration::from_millis(millis as u64)
    }
}

#[async_trait(?Send)]
impl ScriptCommand for TypeText {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        Ok(Self::new(parse_quoted_string(args)?))
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        let mut buf = [0u8; 4];
        for ch in self.text.chars() {
            ctx.write(ch.encode_utf8(&mut buf).as_bytes())?;
            ctx.idle(self.next_delay()).await?;
        }

        // Longer pause after the last character before submitting.
        ctx.idle(self.max_delay * 2).await?;
        ctx.write(b"\n")?;
        ctx.idle(Duration::from_millis(100)).await
    }
}
