//! [`KeyPress`] command: sends the byte sequence of a single key.
//!
//! Script syntax: `key Enter`, `key Up`, `key Ctrl+C`, `key Alt+x`

use crate::command::{Context, ScriptCommand};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;

/// Sends one key press to the program, as a terminal would encode it.
pub struct KeyPress {
    pub key: String,
    pub bytes: Vec<u8>,
}

impl KeyPress {
    pub const NAME: &'static str = "key";
}

fn named_key(name: &str) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match name.to_ascii_lowercase().as_str() {
        "enter" | "return" => b"\r",
        "tab" => b"\t",
        "esc" | "escape" => b"\x1b",
        "backspace" => b"\x7f",
        "space" => b" ",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "delete" => b"\x1b[3~",
        _ => return None,
    };
    Some(bytes)
}

/// Encode `combo`, e.g. `Enter`, `Ctrl+C` or `Alt+b`.
fn encode(combo: &str) -> Result<Vec<u8>> {
    if combo.chars().count() == 1 {
        return Ok(combo.as_bytes().to_vec());
    }
    if let Some(named) = named_key(combo) {
        return Ok(named.to_vec());
    }

    let (modifier, key) = combo
        .split_once('+')
        .ok_or_else(|| anyhow!("Unknown key: {}", combo))?;
    match modifier.to_ascii_lowercase().as_str() {
        "ctrl" => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) if ch.is_ascii_alphabetic() || "@[\\]^_".contains(ch) => {
                    Ok(vec![ch.to_ascii_uppercase() as u8 & 0x1f])
                }
                _ => Err(anyhow!("Unsupported Ctrl combination: {}", combo)),
            }
        }
        "alt" => {
            let mut bytes = vec![0x1b];
            bytes.extend(encode(key)?);
            Ok(bytes)
        }
        _ => Err(anyhow!("Unknown modifier in key: {}", combo)),
    }
}

#[async_trait(?Send)]
impl ScriptCommand for KeyPress {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn parse(args: &str) -> Result<Self> {
        let key = args.trim();
        if key.is_empty() {
            return Err(anyhow!("Expected a key name after 'key'"));
        }
        Ok(Self {
            key: key.to_string(),
            bytes: encode(key)?,
        })
    }

    async fn execute(&self, ctx: &mut Context) -> Result<()> {
        ctx.write(&self.bytes)?;
        ctx.idle(Duration::from_millis(50)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ScriptCommand;

    fn bytes(args: &str) -> Vec<u8> {
        KeyPress::parse(args).unwrap().bytes
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(bytes("Enter"), b"\r");
        assert_eq!(bytes("tab"), b"\t");
        assert_eq!(bytes("Esc"), b"\x1b");
        assert_eq!(bytes("Backspace"), b"\x7f");
        assert_eq!(bytes("Up"), b"\x1b[A");
        assert_eq!(bytes("Left"), b"\x1b[D");
    }

    #[test]
    fn test_ctrl_keys() {
        assert_eq!(bytes("Ctrl+C"), [0x03]);
        assert_eq!(bytes("ctrl+d"), [0x04]);
        assert_eq!(bytes("Ctrl+["), [0x1b]);
    }

    #[test]
    fn test_alt_keys() {
        assert_eq!(bytes("Alt+b"), b"\x1bb");
        assert_eq!(bytes("Alt+Enter"), b"\x1b\r");
    }

    #[test]
    fn test_single_character() {
        assert_eq!(bytes("q"), b"q");
    }

    #[test]
    fn test_invalid_keys() {
        assert!(KeyPress::parse("").is_err());
        assert!(KeyPress::parse("Hyper").is_err());
        assert!(KeyPress::parse("Ctrl+Tab").is_err());
        assert!(KeyPress::parse("Meta+x").is_err());
    }
}
