//! Parser for the line-oriented session scripting language.
//!
//! One command per line: a keyword, a space, then the command's own
//! arguments. Blank lines and `#` comments are skipped. The top-level entry
//! points are [`parse_str`] and [`parse_file`].

use crate::command::ScriptCommand;
use crate::commands::{Expect, KeyPress, SendInput, Show, TypeText, Wait};
use anyhow::{Context as _, Result, anyhow};
use std::path::Path;
use std::time::Duration;

/// Parse a script held in memory.
///
/// A `#` outside double quotes starts a comment that runs to the end of the
/// line. Errors name the offending line number.
///
/// ```
/// use shellexpect::parse_str;
///
/// let commands = parse_str("expect \"$ \" 5s # prompt\nsend \"uptime\"\n").unwrap();
/// assert_eq!(commands.len(), 2);
/// ```
pub fn parse_str(content: &str) -> Result<Vec<Box<dyn ScriptCommand>>> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = strip_comment(line);
            (!line.is_empty()).then_some((index + 1, line))
        })
        .map(|(number, line)| {
            parse_line(line).with_context(|| format!("Failed to parse line {number}: {line}"))
        })
        .collect()
}

/// Read and parse a script file.
///
/// ```no_run
/// use shellexpect::parse_file;
///
/// let commands = parse_file("deploy.script").unwrap();
/// ```
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Box<dyn ScriptCommand>>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script file: {}", path.display()))?;
    parse_str(&content)
}

type ParseFn = fn(&str) -> Result<Box<dyn ScriptCommand>>;

/// Script keywords and their parsers. New commands register here.
static REGISTRY: &[(&str, ParseFn)] = &[
    (Expect::NAME, Expect::parse_boxed),
    (SendInput::NAME, SendInput::parse_boxed),
    (TypeText::NAME, TypeText::parse_boxed),
    (KeyPress::NAME, KeyPress::parse_boxed),
    (Show::NAME, Show::parse_boxed),
    (Wait::NAME, Wait::parse_boxed),
];

fn parse_line(line: &str) -> Result<Box<dyn ScriptCommand>> {
    let (keyword, args) = line.split_once(' ').unwrap_or((line, ""));
    let (_, parse) = REGISTRY
        .iter()
        .find(|(name, _)| *name == keyword)
        .ok_or_else(|| anyhow!("Unknown command: {}", keyword))?;
    parse(args)
}

/// Byte index of the quote closing the string that starts at `s[0]`,
/// skipping backslash-escaped characters.
fn closing_quote(s: &str) -> Option<usize> {
    let mut escaped = false;
    s.char_indices().skip(1).find_map(|(i, ch)| {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return Some(i),
            _ => {}
        }
        None
    })
}

/// `line` without its comment and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    let mut rest = line;
    let mut offset = 0;
    while let Some(i) = rest.find(['"', '#']) {
        if rest[i..].starts_with('#') {
            return line[..offset + i].trim();
        }
        match closing_quote(&rest[i..]) {
            Some(end) => {
                offset += i + end + 1;
                rest = &line[offset..];
            }
            // Unclosed quote: leave it for the command parser to report.
            None => break,
        }
    }
    line.trim()
}

/// Split a leading double-quoted string off `s`.
///
/// Returns the string's content and whatever follows the closing quote. With
/// `unescape` the content goes through [`parse_quoted_string`]; otherwise only
/// `\"` is unescaped, leaving regex escapes such as `\d` intact.
pub(crate) fn take_quoted(s: &str, unescape: bool) -> Result<(String, &str)> {
    if !s.starts_with('"') {
        return Err(anyhow!("Expected quoted string, got: {}", s));
    }
    let end = closing_quote(s).ok_or_else(|| anyhow!("Unclosed quote: {}", s))?;
    let content = if unescape {
        parse_quoted_string(&s[..=end])?
    } else {
        s[1..end].replace("\\\"", "\"")
    };
    Ok((content, &s[end + 1..]))
}

/// Parse a duration: `1s`, `500ms`, `1.5s`.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(millis) = s.strip_suffix("ms") {
        let millis: u64 = millis.trim().parse().context("Invalid milliseconds value")?;
        Ok(Duration::from_millis(millis))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: f64 = secs.trim().parse().context("Invalid seconds value")?;
        Duration::try_from_secs_f64(secs).map_err(|err| anyhow!("Invalid duration {}: {}", s, err))
    } else {
        Err(anyhow!("Duration must end with 's' or 'ms', got: {}", s))
    }
}

/// Parse a whole double-quoted argument, processing `\n`, `\r`, `\t`, `\e`,
/// `\"` and `\\`. Other escapes are kept as written.
pub(crate) fn parse_quoted_string(s: &str) -> Result<String> {
    let s = s.trim();
    let inner = s
        .strip_prefix('"')
        .ok_or_else(|| anyhow!("Expected string to start with '\"'"))?;
    let inner = inner
        .strip_suffix('"')
        .filter(|_| closing_quote(s) == Some(s.len() - 1))
        .ok_or_else(|| anyhow!("Expected a single quoted string, got: {}", s))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('e') => out.push('\x1b'),
            Some(other @ ('"' | '\\')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    Ok(out)
}
