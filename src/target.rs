//! Match targets and the results of waiting on them.

use crate::error::{Error, Result};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Regex source matching common bash prompts such as `[user@host ~]$ `,
/// optionally preceded by a `(venv) ` style marker.
pub const PROMPT: &str = r"(\(.*\)\s+)?\[.*\][\$#]\s+";

static PROMPT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PROMPT).expect("PROMPT is a valid expression"));

/// Something to wait for in a command's output.
#[derive(Clone)]
pub enum Target {
    /// The stream has ended.
    Eof,
    /// A contiguous substring of the transcript.
    Literal(String),
    /// Any match of a regular expression.
    Pattern(Regex),
}

impl Target {
    pub fn literal(text: impl Into<String>) -> Self {
        Target::Literal(text.into())
    }

    /// Compile `pattern` into a target.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Target::Pattern)
            .map_err(|err| Error::InvalidArgument(format!("invalid pattern '{pattern}': {err}")))
    }

    /// The shell prompt target built from [`PROMPT`].
    pub fn prompt() -> Self {
        Target::Pattern(PROMPT_REGEX.clone())
    }

    /// Byte range of the first match in `text`. `Eof` matches the empty
    /// range at the end of `text` once the stream has `ended`, regardless of
    /// content.
    pub(crate) fn find(&self, text: &str, ended: bool) -> Option<(usize, usize)> {
        match self {
            Target::Eof => ended.then_some((text.len(), text.len())),
            Target::Literal(literal) => text
                .find(literal.as_str())
                .map(|start| (start, start + literal.len())),
            Target::Pattern(regex) => regex.find(text).map(|m| (m.start(), m.end())),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Eof => f.write_str("Eof"),
            Target::Literal(text) => f.debug_tuple("Literal").field(text).finish(),
            Target::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
        }
    }
}

impl From<&str> for Target {
    fn from(text: &str) -> Self {
        Target::Literal(text.to_string())
    }
}

impl From<String> for Target {
    fn from(text: String) -> Self {
        Target::Literal(text)
    }
}

impl From<Regex> for Target {
    fn from(regex: Regex) -> Self {
        Target::Pattern(regex)
    }
}

/// The target that satisfied an `expect` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    /// Position of the winning target in the list passed to `expect`.
    pub index: usize,
    /// The matched text. Empty for [`Target::Eof`].
    pub text: String,
    /// Unconsumed output preceding the match.
    pub before: String,
}

/// How an `expect` call finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    Matched(Match),
    /// The stream closed and no target matched.
    Ended,
    /// The deadline passed while the stream was still live.
    TimedOut,
}

impl ExpectOutcome {
    /// Index of the matched target, if any.
    pub fn index(&self) -> Option<usize> {
        match self {
            ExpectOutcome::Matched(found) => Some(found.index),
            _ => None,
        }
    }
}
