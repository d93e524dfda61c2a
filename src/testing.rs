//! In-memory stand-ins for channels and shells.
//!
//! Useful for exercising scripted interactions without spawning processes
//! or reaching a remote host.

use crate::channel::{Channel, Chunk};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::shell::{Endpoint, Shell};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Pending,
    Delay(Duration),
    Fail(String),
    Close,
    Stall,
    Flood(Vec<u8>),
}

/// A channel that replays a fixed script, one step per read.
///
/// Once the script runs out the channel stays live and silent, like a
/// command waiting for input.
#[derive(Debug)]
pub struct ScriptedChannel {
    steps: VecDeque<Step>,
    delay_started: Option<Instant>,
    ended: bool,
    exit_status: Option<i32>,
    input: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChannel {
    pub fn new() -> Self {
        ScriptedChannel {
            steps: VecDeque::new(),
            delay_started: None,
            ended: false,
            exit_status: None,
            input: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Produce `data` on the next read.
    pub fn data(mut self, data: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Data(data.as_ref().to_vec()));
        self
    }

    /// Report nothing ready for one read.
    pub fn pending(mut self) -> Self {
        self.steps.push_back(Step::Pending);
        self
    }

    /// Report nothing ready until `duration` has passed.
    pub fn delay(mut self, duration: Duration) -> Self {
        self.steps.push_back(Step::Delay(duration));
        self
    }

    /// Fail the read with a broken-stream error.
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.steps.push_back(Step::Fail(reason.into()));
        self
    }

    /// End the stream.
    pub fn close(mut self) -> Self {
        self.steps.push_back(Step::Close);
        self
    }

    /// Stay live and silent forever.
    pub fn stall(mut self) -> Self {
        self.steps.push_back(Step::Stall);
        self
    }

    /// Produce `data` on every read from here on, without end.
    pub fn flood(mut self, data: impl AsRef<[u8]>) -> Self {
        self.steps.push_back(Step::Flood(data.as_ref().to_vec()));
        self
    }

    /// Exit status reported once the stream has ended.
    pub fn exit_with(mut self, status: i32) -> Self {
        self.exit_status = Some(status);
        self
    }

    /// Everything written to the channel so far.
    pub fn input_log(&self) -> Arc<Mutex<Vec<u8>>> {
        self.input.clone()
    }

    /// How many times the channel has been closed.
    pub fn close_count(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

impl Channel for ScriptedChannel {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closes.load(Ordering::SeqCst) > 0 {
            return Err(Error::Channel("write to a closed channel".to_string()));
        }
        self.input
            .lock()
            .map_err(|_| Error::Channel("input log poisoned".to_string()))?
            .extend_from_slice(data);
        Ok(())
    }

    fn try_read(&mut self) -> Result<Chunk> {
        loop {
            let Some(step) = self.steps.front() else {
                return Ok(Chunk::Pending);
            };
            match step {
                Step::Data(_) | Step::Pending => {
                    return match self.steps.pop_front() {
                        Some(Step::Data(data)) => Ok(Chunk::Data(data)),
                        _ => Ok(Chunk::Pending),
                    };
                }
                Step::Delay(duration) => {
                    let started = *self.delay_started.get_or_insert_with(Instant::now);
                    if started.elapsed() < *duration {
                        return Ok(Chunk::Pending);
                    }
                    self.delay_started = None;
                    self.steps.pop_front();
                }
                Step::Fail(reason) => return Err(Error::Channel(reason.clone())),
                Step::Close => {
                    self.ended = true;
                    return Ok(Chunk::Closed);
                }
                Step::Stall => return Ok(Chunk::Pending),
                Step::Flood(data) => return Ok(Chunk::Data(data.clone())),
            }
        }
    }

    fn exit_status(&mut self) -> Option<i32> {
        if self.ended { self.exit_status } else { None }
    }

    fn close(&mut self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type ChannelFactory = Box<dyn Fn() -> ScriptedChannel + Send + Sync>;

/// A shell whose commands are answered by scripted channels.
///
/// Commands without a registered script fail to spawn.
pub struct MockShell {
    config: SessionConfig,
    endpoint: Option<Endpoint>,
    scripts: Vec<(String, ChannelFactory)>,
    history: Mutex<Vec<String>>,
}

impl Default for MockShell {
    fn default() -> Self {
        Self::new()
    }
}

impl MockShell {
    pub fn new() -> Self {
        Self::with_config(SessionConfig::default())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        MockShell {
            config,
            endpoint: None,
            scripts: Vec::new(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Answer `command` with a fresh channel from `script` each time it runs.
    pub fn on(
        mut self,
        command: impl Into<String>,
        script: impl Fn() -> ScriptedChannel + Send + Sync + 'static,
    ) -> Self {
        self.scripts.push((command.into(), Box::new(script)));
        self
    }

    /// Present the shell as running on another machine.
    pub fn remote(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Commands opened so far, in order.
    pub fn history(&self) -> Vec<String> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Shell for MockShell {
    fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn is_remote(&self) -> bool {
        self.endpoint.is_some()
    }

    fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.clone()
    }

    async fn open_channel(&self, command: &str, _interactive: bool) -> Result<Box<dyn Channel>> {
        if let Ok(mut history) = self.history.lock() {
            history.push(command.to_string());
        }
        self.scripts
            .iter()
            .find(|(known, _)| known == command)
            .map(|(_, script)| Box::new(script()) as Box<dyn Channel>)
            .ok_or_else(|| Error::Spawn {
                command: command.to_string(),
                reason: "no script registered".to_string(),
            })
    }
}
