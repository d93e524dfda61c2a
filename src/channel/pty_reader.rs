use std::io::{self, Read};
use std::sync::mpsc::{Receiver, channel};
use std::thread;
use tracing::trace;

/// Spawns a background thread that forwards everything read from `reader`.
///
/// The receiver disconnects at end of stream. A read error is forwarded
/// once and then the thread stops.
pub fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = channel();

    thread::spawn(move || {
        let mut buffer = [0u8; 4096];
        loop {
            match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(buffer[..n].to_vec())).is_err() {
                        break; // Receiver dropped
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) if is_hangup(&err) => break,
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
        trace!("pty reader finished");
    });

    rx
}

/// A PTY master reports EIO once the last slave descriptor is closed, which
/// is how a finished child shows up on Linux.
#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    const EIO: i32 = 5;
    err.raw_os_error() == Some(EIO)
}

#[cfg(not(unix))]
fn is_hangup(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::BrokenPipe
}
