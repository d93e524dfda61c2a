//! Session tuning shared by every shell.

use std::time::Duration;

/// Screen geometry and polling behaviour for an interaction session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Screen width in columns.
    pub cols: u16,
    /// Screen height in rows.
    pub rows: u16,
    /// Maximum number of lines kept once they leave the visible screen.
    pub scrollback: usize,
    /// First idle sleep between polls that returned nothing.
    pub poll_interval: Duration,
    /// Upper bound for the idle sleep as it backs off.
    pub max_backoff: Duration,
    /// Timeout used by callers that do not pass one explicitly.
    pub timeout: Duration,
    /// How long to wait for an exit status after the stream has ended.
    pub exit_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback: 10_000,
            poll_interval: Duration::from_millis(5),
            max_backoff: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
            exit_grace: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn with_size(mut self, cols: u16, rows: u16) -> Self {
        // A zero-sized grid has no cursor position to clamp to.
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        self
    }

    pub fn with_scrollback(mut self, lines: usize) -> Self {
        self.scrollback = lines;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, poll_interval: Duration, max_backoff: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_backoff = max_backoff.max(poll_interval);
        self
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}
