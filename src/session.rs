//! Interaction sessions: a live channel plus the screen its output is
//! rendered on, with an `expect` loop over the resulting transcript.

use crate::channel::Channel;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::reader::{AbortHandle, Poll, StreamReader};
use crate::screen::Screen;
use crate::target::{ExpectOutcome, Match, Target};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// Idle sleep between polls that doubles up to a ceiling.
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(config: &SessionConfig) -> Self {
        Backoff {
            initial: config.poll_interval,
            max: config.max_backoff,
            current: config.poll_interval,
        }
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Sleep for the current interval, never past `limit`.
    async fn idle(&mut self, limit: Duration) {
        sleep(self.current.min(limit)).await;
        self.current = (self.current * 2).min(self.max);
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// A running command whose output can be waited on.
///
/// One session drives one channel; calls must be serialized by the caller.
/// The channel is closed when the session is closed or dropped.
pub struct Session {
    reader: StreamReader,
    config: SessionConfig,
    /// Transcript position, counted from the very first byte, up to which
    /// output has been claimed by earlier matches.
    consumed: usize,
}

impl Session {
    pub fn new(channel: Box<dyn Channel>, config: SessionConfig) -> Self {
        let screen = Screen::with_scrollback(config.cols, config.rows, config.scrollback);
        Session {
            reader: StreamReader::new(channel, screen),
            config,
            consumed: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receive raw output bytes as they are read, e.g. to echo them.
    pub fn on_output(&mut self, handler: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.reader.set_output_handler(Arc::new(handler));
    }

    /// Read whatever output is ready without waiting for more.
    pub fn poll(&mut self) -> Result<Poll> {
        self.reader.poll()
    }

    /// Write raw bytes to the command.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        self.reader.write(data)
    }

    /// Write `line` followed by a newline.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.reader.write(&data)
    }

    /// Wait until one of `targets` matches the output that has not been
    /// claimed by a previous match, the stream ends, or `timeout` passes.
    ///
    /// When several targets match on the same scan the one listed first wins,
    /// wherever its text sits in the output. A match claims the output up to
    /// its end so it is not matched again.
    pub async fn expect(&mut self, targets: &[Target], timeout: Duration) -> Result<ExpectOutcome> {
        if targets.is_empty() {
            return Err(Error::InvalidArgument(
                "expect needs at least one target".to_string(),
            ));
        }

        // A timeout too large to add to the clock means no deadline at all.
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = Backoff::new(&self.config);
        loop {
            let poll = self.reader.poll()?;

            if let Some(found) = self.scan(targets, poll.ended) {
                debug!(index = found.index, "expect matched");
                return Ok(ExpectOutcome::Matched(found));
            }
            if poll.ended {
                debug!(?targets, "stream ended without a match");
                return Ok(ExpectOutcome::Ended);
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.config.max_backoff,
            };
            if remaining.is_zero() {
                debug!(?targets, ?timeout, "expect timed out");
                return Ok(ExpectOutcome::TimedOut);
            }
            if poll.received {
                backoff.reset();
                tokio::task::yield_now().await;
            } else {
                backoff.idle(remaining).await;
            }
        }
    }

    /// Like [`expect`](Self::expect), but only a match is a success: a timeout
    /// fails with [`Error::Timeout`] and an unmatched end of stream with
    /// [`Error::UnexpectedEof`].
    pub async fn expect_index(&mut self, targets: &[Target], timeout: Duration) -> Result<usize> {
        match self.expect(targets, timeout).await? {
            ExpectOutcome::Matched(found) => Ok(found.index),
            ExpectOutcome::Ended => Err(Error::UnexpectedEof),
            ExpectOutcome::TimedOut => Err(Error::Timeout(timeout)),
        }
    }

    fn scan(&mut self, targets: &[Target], ended: bool) -> Option<Match> {
        let screen = self.reader.screen();
        let transcript = screen.transcript();
        let base = screen.transcript_offset();
        let start = floor_char_boundary(&transcript, self.consumed.saturating_sub(base));
        let unclaimed = &transcript[start..];

        let (index, (from, to)) = targets
            .iter()
            .enumerate()
            .find_map(|(index, target)| target.find(unclaimed, ended).map(|range| (index, range)))?;
        self.consumed = base + start + to;
        Some(Match {
            index,
            text: unclaimed[from..to].to_string(),
            before: unclaimed[..from].to_string(),
        })
    }

    /// Drain output until the stream ends, then wait up to the configured
    /// grace period for the exit status.
    ///
    /// With a `timeout`, a stream still live when it passes is an
    /// [`Error::Timeout`].
    pub async fn wait_exit_status(&mut self, timeout: Option<Duration>) -> Result<Option<i32>> {
        let started = Instant::now();
        let mut backoff = Backoff::new(&self.config);
        loop {
            let poll = self.reader.poll()?;
            if poll.ended {
                break;
            }
            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    return Err(Error::Timeout(limit));
                }
            }
            if poll.received {
                backoff.reset();
                tokio::task::yield_now().await;
            } else {
                backoff.idle(self.config.max_backoff).await;
            }
        }

        let grace = Instant::now().checked_add(self.config.exit_grace);
        backoff.reset();
        loop {
            if let Some(status) = self.reader.exit_status() {
                debug!(status, "command exited");
                return Ok(Some(status));
            }
            let remaining = match grace {
                Some(grace) => grace.saturating_duration_since(Instant::now()),
                None => self.config.max_backoff,
            };
            if remaining.is_zero() {
                debug!("no exit status reported");
                return Ok(None);
            }
            backoff.idle(remaining).await;
        }
    }

    /// Exit status, if the command has finished.
    pub fn exit_status(&mut self) -> Option<i32> {
        self.reader.exit_status()
    }

    pub fn exit_status_ready(&mut self) -> bool {
        self.exit_status().is_some()
    }

    /// Whether end of stream has been observed.
    pub fn is_ended(&self) -> bool {
        self.reader.is_ended()
    }

    /// Everything rendered so far, including scrollback.
    pub fn transcript(&self) -> String {
        self.reader.screen().transcript()
    }

    /// Output not yet claimed by a match.
    pub fn unclaimed(&self) -> String {
        let screen = self.reader.screen();
        let transcript = screen.transcript();
        let start = floor_char_boundary(
            &transcript,
            self.consumed.saturating_sub(screen.transcript_offset()),
        );
        transcript[start..].to_string()
    }

    /// The visible screen as text.
    pub fn render(&self) -> String {
        self.reader.screen().render()
    }

    pub fn screen(&self) -> &Screen {
        self.reader.screen()
    }

    /// Handle that closes this session's channel from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.reader.abort_handle()
    }

    /// Close the channel now rather than on drop.
    pub fn close(mut self) -> Result<()> {
        self.reader.close()
    }
}
