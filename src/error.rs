//! Error kinds surfaced by sessions, channels and shells.

use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The caller passed something the operation cannot work with, such as
    /// an empty target list or a pattern that does not compile.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A remote session or channel could not be established.
    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    /// A local command could not be launched.
    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    /// Reading from or writing to a live channel failed.
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Timed out after {0:?} waiting for output")]
    Timeout(Duration),

    /// A shell helper's command exited unsuccessfully or printed something
    /// that could not be understood.
    #[error("Command '{command}' failed (status {status:?}): {output}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        output: String,
    },

    /// The stream ended before any target matched.
    #[error("End of stream reached before any target matched")]
    UnexpectedEof,
}

impl Error {
    pub(crate) fn channel(err: impl std::fmt::Display) -> Self {
        Error::Channel(err.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Channel(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
