//! [`Show`] command: prints a note or the session's current state to the
//! output handler.
//!
//! Script syntax: `show "text"`, `show screen`, `show unclaimed`

use crate::command::{Context, ScriptCommand};
use crate::parser::parse_quoted_string;
use anyhow::{Result, anyhow};
use async_trait::async_trait;

/// Writes to the output handler without sending anything to the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Show {
    /// A literal annotation.
    Note(String),
    /// The visible screen, as rendered so far.
    Screen,
    /// Output not yet claimed by an `expect`.
    Unclaimed,
}

impl Show {
    pub const NAME: &'static str = "show";

    pub fn note(text: impl Into<String>) -> Self {
        Show::Note(text.into())
    }

    fn text(&self, ctx: &Context) -> String {
        match self {
            Show::Note(text) => text.clone(),
            Show::Screen => ctx.session().render(),
            Show::Unclaimed => ctx.session().unclaimed(),
        }
    }
}

#[async_trait(?Send)]
impl ScriptCommand for Show {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        match args.trim() {
            "screen" => Ok(Show::Screen),
            "unclaimed" => Ok(Show::Unclaimed),
            quoted if quoted.starts_with('"') => Ok(Show::Note(parse_quoted_string(quoted)?)),
            other => Err(anyhow!(
                "show expects a quoted note, 'screen' or 'unclaimed', got: {}",
                other
            )),
        }
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        if !matches!(self, Show::Note(_)) {
            // Bring the screen up to date before printing it.
            ctx.session_mut().poll()?;
        }
        let mut text = self.text(ctx);
        text.push('\n');
        ctx.emit(text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ScriptCommand;
    use crate::command::tests::capture;
    use crate::testing::ScriptedChannel;
    use std::time::Duration;

    #[test]
    fn test_parse() {
        assert_eq!(Show::parse(r#""hello world""#).unwrap(), Show::note("hello world"));
        assert_eq!(Show::parse("screen").unwrap(), Show::Screen);
        assert_eq!(Show::parse(" unclaimed ").unwrap(), Show::Unclaimed);
    }

    #[test]
    fn test_parse_rejects_bare_words() {
        assert!(Show::parse(r#""unclosed"#).is_err());
        assert!(Show::parse("everything").is_err());
        assert!(Show::parse("").is_err());
    }

    #[tokio::test]
    async fn test_note_bypasses_program() {
        let channel = ScriptedChannel::new().stall();
        let input = channel.input_log();
        let (mut ctx, captured) = capture(channel);
        Show::note("note").execute(&mut ctx).await.unwrap();
        assert_eq!(&*captured.lock().unwrap(), b"note\n");
        assert!(input.lock().unwrap().is_empty());
        assert_eq!(ctx.session().transcript(), "");
    }

    #[tokio::test]
    async fn test_screen_shows_rendered_output() {
        let channel = ScriptedChannel::new().data("10%\r100%\r\ndone").stall();
        let (mut ctx, captured) = capture(channel);
        Show::Screen.execute(&mut ctx).await.unwrap();
        let captured = captured.lock().unwrap();
        // Raw echo first, then the rendered screen without the overwritten text.
        assert!(captured.ends_with(b"100%\ndone\n"), "got: {:?}", String::from_utf8_lossy(&captured));
    }

    #[tokio::test]
    async fn test_unclaimed_follows_expect() {
        let (mut ctx, captured) = capture(ScriptedChannel::new().data("BEGIN rest").stall());
        ctx.expect(&["BEGIN".into()], Some(Duration::from_secs(5)))
            .await
            .unwrap();
        captured.lock().unwrap().clear();
        Show::Unclaimed.execute(&mut ctx).await.unwrap();
        assert_eq!(&*captured.lock().unwrap(), b" rest\n");
    }
}
