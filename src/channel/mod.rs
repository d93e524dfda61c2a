//! Byte channels to running commands.
//!
//! A [`Channel`] is everything a session needs from the process or
//! connection behind it: write bytes, read whatever is ready without
//! blocking, report an exit status, and close.

mod local;
mod pty_reader;
mod remote;

pub use local::PtyChannel;
pub use remote::{Credential, SshChannel, SshConnection};
pub(crate) use remote::split_host;

use crate::error::Result;

/// Outcome of a single non-blocking read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Output bytes, in the order the command produced them.
    Data(Vec<u8>),
    /// Nothing is ready yet; the command may still produce output.
    Pending,
    /// End of stream; no further bytes will arrive.
    Closed,
}

/// Bidirectional byte stream bound to one running command.
///
/// Implementations report a broken stream as an [`Error::Channel`] from
/// `try_read` or `write`, never as [`Chunk::Closed`].
///
/// [`Error::Channel`]: crate::Error::Channel
pub trait Channel: Send {
    /// Send bytes to the command's input.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever output is ready without waiting for more.
    fn try_read(&mut self) -> Result<Chunk>;

    /// The command's exit status once it is known.
    fn exit_status(&mut self) -> Option<i32>;

    /// Release the channel, terminating the command if it is still running.
    fn close(&mut self) -> Result<()>;
}
