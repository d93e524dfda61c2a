//! # shellexpect
//!
//! Run commands on this machine or over SSH, and wait on what they print.
//!
//! Output is fed through a virtual terminal before it is matched, so cursor
//! movement, overwrites and colour codes are resolved into the text a person
//! watching the terminal would have seen. Matching works the same whether
//! the command runs locally or remotely.
//!
//! ## Quick start
//!
//! ```no_run
//! use shellexpect::{LocalShell, Shell, Target};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> shellexpect::Result<()> {
//!     let shell = LocalShell::new();
//!     let mut session = shell.interact("bash --norc").await?;
//!
//!     session.send_line("echo hello")?;
//!     let index = session
//!         .expect_index(&["hello".into(), Target::Eof], Duration::from_secs(5))
//!         .await?;
//!     assert_eq!(index, 0);
//!
//!     let listing = shell.run("ls -1").await?;
//!     println!("{} (exit {:?})", listing.output, listing.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Targets
//!
//! [`Session::expect`] takes an ordered list of [`Target`]s: literals,
//! regular expressions, or [`Target::Eof`]. When several match on the same
//! scan, the one listed first wins. A match claims the output up to its end,
//! so the next `expect` only looks at what came after it.
//!
//! The outcome is a value rather than an error: [`ExpectOutcome::Matched`],
//! [`ExpectOutcome::Ended`] or [`ExpectOutcome::TimedOut`].
//! [`Session::expect_index`] turns the last two into errors for callers that
//! only care about the happy path.
//!
//! ## Files
//!
//! [`ShellPath`] reads, writes, lists and stats files through any [`Shell`],
//! and [`Rsync`] copies them between shells, reporting [`Progress`] as it
//! goes. [`Shell::identity`] parses `id` into an [`Identity`].
//!
//! ## Scripts
//!
//! The `shellexpect` binary drives one session from a small line-oriented
//! script. The same machinery is available as a library through
//! [`parse_str`], [`parse_file`] and [`Engine`].
//!
//! | Command | Description |
//! |---------|-------------|
//! | `type "text"` | Simulate typing with per-character delays |
//! | `send "text"` | Send a line to the program immediately |
//! | `key Enter` | Send a key press (supports `Ctrl+` and `Alt+` modifiers) |
//! | `show "text"` | Write a note to the output handler (`show screen` / `show unclaimed` print session state) |
//! | `expect "text" re"regex" EOF 5s` | Wait until one of the targets matches |
//! | `wait 500ms` | Pause for a duration (`ms` or `s` units, floats allowed) |
//! | `wait quiet 300ms` | Wait until the program has printed nothing for a while |
//! | `wait exit [10s]` | Wait for the program to exit; a non-zero status fails the script |
//! | `# comment` | Full-line or inline comment |
//!
//! ## Testing
//!
//! [`testing::ScriptedChannel`] and [`testing::MockShell`] stand in for real
//! processes and hosts.

pub mod channel;
pub mod command;
pub mod commands;
mod config;
pub mod engine;
mod error;
mod id;
pub mod parser;
mod paths;
mod reader;
mod screen;
mod session;
mod shell;
mod target;
pub mod testing;
mod transfer;

pub use channel::{Channel, Chunk, Credential};
pub use command::{Context, ScriptCommand};
pub use commands::{Expect, KeyPress, SendInput, Show, TypeText, Wait};
pub use config::SessionConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use id::{Identity, Principal, parse_id};
pub use parser::{parse_duration, parse_file, parse_str};
pub use paths::{FileStat, ShellPath, ShellPathBuf};
pub use reader::{AbortHandle, Poll};
pub use screen::{Attrs, Cell, Screen};
pub use session::Session;
pub use shell::{Endpoint, LocalShell, RemoteShell, RunOutput, Shell, shell_quote};
pub use target::{ExpectOutcome, Match, PROMPT, Target};
pub use transfer::{Progress, ProgressParser, Rsync, RsyncCommand};
