//! [`Expect`] command: blocks until one of several targets appears in the output.
//!
//! Script syntax:
//! - `expect "$ "`: default timeout from the session config
//! - `expect "Password:" 10s`: custom timeout
//! - `expect "yes/no" re"[Pp]assword:" EOF`: first listed target to match wins

use crate::command::{Context, ScriptCommand};
use crate::parser::{parse_duration, take_quoted};
use crate::target::Target;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;

/// Blocks until one of `targets` matches the program output, or until the
/// timeout elapses or the output ends.
///
/// A match claims the output up to its end, so a subsequent `Expect` will not
/// match the same occurrence again.
pub struct Expect {
    pub targets: Vec<Target>,
    /// `None` falls back to the session's default timeout.
    pub timeout: Option<Duration>,
}

impl Expect {
    pub const NAME: &'static str = "expect";

    /// Create an `Expect` command that waits for a single literal.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            targets: vec![Target::literal(pattern)],
            timeout: None,
        }
    }

    /// Create an `Expect` command over several targets with a custom timeout.
    pub fn with_timeout(targets: Vec<Target>, timeout: Duration) -> Self {
        Self {
            targets,
            timeout: Some(timeout),
        }
    }
}

#[async_trait(?Send)]
impl ScriptCommand for Expect {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let mut targets = Vec::new();
        let mut timeout = None;
        let mut rest = args.trim();

        while !rest.is_empty() {
            if timeout.is_some() {
                return Err(anyhow!("Unexpected argument after timeout: {}", rest));
            }
            if rest.starts_with('"') {
                let (text, remainder) = take_quoted(rest, true)?;
                targets.push(Target::literal(text));
                rest = remainder;
            } else if rest.starts_with("re\"") {
                let (pattern, remainder) = take_quoted(&rest[2..], false)?;
                targets.push(Target::pattern(&pattern)?);
                rest = remainder;
            } else {
                let (word, remainder) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if word == "EOF" {
                    targets.push(Target::Eof);
                } else {
                    timeout = Some(parse_duration(word)?);
                }
                rest = remainder;
            }
            rest = rest.trim_start();
        }

        if targets.is_empty() {
            return Err(anyhow!("Expected at least one target after 'expect'"));
        }
        Ok(Self { targets, timeout })
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        ctx.expect(&self.targets, self.timeout).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ScriptCommand;
    use crate::command::tests::capture;
    use crate::testing::ScriptedChannel;

    #[test]
    fn test_parse_default_timeout() {
        let cmd = Expect::parse(r#""$ ""#).unwrap();
        assert!(matches!(&cmd.targets[..], [Target::Literal(text)] if text == "$ "));
        assert_eq!(cmd.timeout, None);
    }

    #[test]
    fn test_parse_custom_timeout() {
        let cmd = Expect::parse(r#""hello world" 2s"#).unwrap();
        assert!(matches!(&cmd.targets[..], [Target::Literal(text)] if text == "hello world"));
        assert_eq!(cmd.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_parse_ms_timeout() {
        let cmd = Expect::parse(r#""Ready" 500ms"#).unwrap();
        assert_eq!(cmd.timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_parse_several_targets() {
        let cmd = Expect::parse(r#""yes/no" re"[Pp]ass\w+:" EOF 10s"#).unwrap();
        assert_eq!(cmd.targets.len(), 3);
        assert!(matches!(&cmd.targets[1], Target::Pattern(re) if re.as_str() == r"[Pp]ass\w+:"));
        assert!(matches!(cmd.targets[2], Target::Eof));
        assert_eq!(cmd.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_quoted_space_and_hash() {
        let cmd = Expect::parse(r#""a b # c""#).unwrap();
        assert!(matches!(&cmd.targets[..], [Target::Literal(text)] if text == "a b # c"));
    }

    #[test]
    fn test_parse_invalid_pattern() {
        assert!(Expect::parse(r#"re"(""#).is_err());
    }

    #[test]
    fn test_parse_unclosed_quote() {
        assert!(Expect::parse(r#""unclosed"#).is_err());
    }

    #[test]
    fn test_parse_missing_target() {
        assert!(Expect::parse("").is_err());
        assert!(Expect::parse("5s").is_err());
    }

    #[test]
    fn test_parse_trailing_garbage() {
        assert!(Expect::parse(r#""a" 5s "b""#).is_err());
        assert!(Expect::parse(r#""a" soon"#).is_err());
    }

    #[tokio::test]
    async fn test_execute_eof() {
        let (mut ctx, captured) = capture(ScriptedChannel::new().data("bye\r\n").close());
        Expect::parse(r#""hello" EOF"#)
            .unwrap()
            .execute(&mut ctx)
            .await
            .unwrap();
        assert_eq!(&*captured.lock().unwrap(), b"bye\r\n");
    }
}
