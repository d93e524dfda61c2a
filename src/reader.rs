//! Stream reader: pulls bytes off a [`Channel`] into a [`Screen`].

use crate::channel::{Channel, Chunk};
use crate::error::{Error, Result};
use crate::screen::Screen;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

pub(crate) type OutputHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Bytes taken from the channel in one poll before handing back control.
const MAX_DRAIN: usize = 64 * 1024;

/// Result of one [`StreamReader::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    /// New bytes were fed to the screen.
    pub received: bool,
    /// The stream has ended; nothing more will arrive.
    pub ended: bool,
}

/// Closes a channel from outside the session that owns it.
///
/// A session blocked in `expect` notices on its next poll and fails with a
/// channel error.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// Feeds a channel's output into a virtual screen, one poll at a time.
///
/// Owns the channel and closes it exactly once, on [`close`](Self::close)
/// or on drop.
pub struct StreamReader {
    channel: Box<dyn Channel>,
    screen: Screen,
    ended: bool,
    closed: bool,
    abort: AbortHandle,
    output_handler: Option<OutputHandler>,
}

impl StreamReader {
    pub fn new(channel: Box<dyn Channel>, screen: Screen) -> Self {
        StreamReader {
            channel,
            screen,
            ended: false,
            closed: false,
            abort: AbortHandle::default(),
            output_handler: None,
        }
    }

    /// Drain whatever the channel has ready into the screen without waiting.
    ///
    /// "Nothing new" is `received == false`; end of stream is `ended == true`;
    /// a broken stream is an [`Error::Channel`]. At most 64 KiB are taken per
    /// call, so a command that never stops writing cannot keep
    /// the caller from checking its deadline.
    pub fn poll(&mut self) -> Result<Poll> {
        if self.abort.is_aborted() && !self.closed {
            debug!("channel aborted out-of-band");
            self.close()?;
            return Err(Error::Channel("channel was closed".to_string()));
        }
        if self.closed && !self.ended {
            return Err(Error::Channel("channel was closed".to_string()));
        }

        let mut drained = 0;
        while !self.ended && drained < MAX_DRAIN {
            match self.channel.try_read()? {
                Chunk::Data(data) => {
                    trace!(bytes = data.len(), "read from channel");
                    if let Some(handler) = &self.output_handler {
                        handler(&data);
                    }
                    self.screen.feed(&data);
                    drained += data.len().max(1);
                }
                Chunk::Pending => break,
                Chunk::Closed => {
                    debug!("channel reached end of stream");
                    self.ended = true;
                }
            }
        }

        Ok(Poll {
            received: drained > 0,
            ended: self.ended,
        })
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::Channel("write to a closed channel".to_string()));
        }
        self.channel.write(data)
    }

    pub fn exit_status(&mut self) -> Option<i32> {
        self.channel.exit_status()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub(crate) fn set_output_handler(&mut self, handler: OutputHandler) {
        self.output_handler = Some(handler);
    }

    /// Close the channel. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel.close()
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close channel");
        }
    }
}
