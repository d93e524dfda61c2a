use crate::command::{Context, ScriptCommand};
use crate::reader::OutputHandler;
use crate::session::Session;
use anyhow::{Context as _, Result};
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long to keep echoing output after the last command.
const SETTLE: Duration = Duration::from_millis(100);

/// Runs script commands against one session.
pub struct Engine {
    ctx: Context,
}

impl Engine {
    /// Drive `session`, echoing its output and annotations to stdout.
    pub fn new(session: Session) -> Self {
        Self::with_handler(session, |data| {
            let mut stdout = io::stdout().lock();
            // Best effort.
            let _ = stdout.write_all(data);
            let _ = stdout.flush();
        })
    }

    /// Drive `session`, sending its output and annotations to `handler`.
    pub fn with_handler(session: Session, handler: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        let handler: OutputHandler = Arc::new(handler);
        Engine {
            ctx: Context::new(session, handler),
        }
    }

    /// Execute `commands` in order, stopping at the first failure.
    pub async fn execute(&mut self, commands: Vec<Box<dyn ScriptCommand>>) -> Result<()> {
        for (step, command) in commands.iter().enumerate() {
            debug!(step = step + 1, command = command.name(), "executing");
            command
                .execute(&mut self.ctx)
                .await
                .with_context(|| format!("Step {} ('{}') failed", step + 1, command.name()))?;
        }
        self.ctx.idle(SETTLE).await
    }

    /// Drain the remaining output and return the program's exit status.
    pub async fn wait_exit_status(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        Ok(self.ctx.session.wait_exit_status(timeout).await?)
    }

    pub fn session(&self) -> &Session {
        &self.ctx.session
    }

    pub fn into_session(self) -> Session {
        self.ctx.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::parser::parse_str;
    use crate::testing::ScriptedChannel;
    use std::sync::Mutex;

    fn engine(channel: ScriptedChannel) -> (Engine, Arc<Mutex<Vec<u8>>>) {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let session = Session::new(Box::new(channel), SessionConfig::default());
        let engine = Engine::with_handler(session, move |data| {
            sink.lock().unwrap().extend_from_slice(data)
        });
        (engine, captured)
    }

    #[tokio::test]
    async fn test_script_drives_session() {
        let channel = ScriptedChannel::new()
            .data("[me@box ~]$ ")
            .delay(Duration::from_millis(20))
            .data("ls\r\nnotes.txt\r\n[me@box ~]$ ")
            .stall();
        let input = channel.input_log();
        let (mut engine, captured) = engine(channel);

        let script = "expect re\"\\[.*\\]\\$ \"\nsend \"ls\"\nexpect \"notes.txt\" 2s\nshow \"-- done\"\n";
        engine.execute(parse_str(script).unwrap()).await.unwrap();

        assert_eq!(&*input.lock().unwrap(), b"ls\n");
        let output = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(output.contains("notes.txt"));
        assert!(output.contains("-- done\n"));
    }

    #[tokio::test]
    async fn test_failure_names_step() {
        let (mut engine, _) = engine(ScriptedChannel::new().data("nope").close());
        let commands = parse_str("wait 1ms\nexpect \"yes\"\n").unwrap();
        let err = engine.execute(commands).await.unwrap_err();
        assert!(format!("{err:#}").contains("Step 2 ('expect')"), "got: {err:#}");
    }

    #[tokio::test]
    async fn test_exit_status_after_script() {
        let channel = ScriptedChannel::new().data("bye\r\n").close().exit_with(7);
        let (mut engine, _) = engine(channel);
        engine.execute(parse_str("expect EOF").unwrap()).await.unwrap();
        assert_eq!(engine.wait_exit_status(None).await.unwrap(), Some(7));
        assert_eq!(engine.into_session().transcript(), "bye");
    }
}
