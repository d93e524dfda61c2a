//! Parsing of `id` output: `uid=1000(alice) gid=1000(alice) groups=1000(alice),27(sudo)`.

use crate::error::{Error, Result};

/// A numeric user or group id, with its name when `id` printed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: u32,
    pub name: Option<String>,
}

/// Who a shell's commands run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: Principal,
    pub group: Principal,
    /// Supplementary groups, in the order `id` listed them.
    pub groups: Vec<Principal>,
}

impl Identity {
    pub fn is_root(&self) -> bool {
        self.user.id == 0
    }

    pub fn in_group(&self, name: &str) -> bool {
        std::iter::once(&self.group)
            .chain(&self.groups)
            .any(|group| group.name.as_deref() == Some(name))
    }
}

/// Parse one line of `id` output.
///
/// Fields other than `uid`, `gid` and `groups` (e.g. an SELinux `context=`)
/// are skipped. Group names may contain spaces.
///
/// ```
/// use shellexpect::parse_id;
///
/// let identity = parse_id("uid=0(root) gid=0(root) groups=0(root)").unwrap();
/// assert!(identity.is_root());
/// ```
pub fn parse_id(text: &str) -> Result<Identity> {
    let invalid = |reason: &str| Error::InvalidArgument(format!("{reason} in id output: {text}"));

    let mut user = None;
    let mut group = None;
    let mut groups = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        let (key, tail) = rest.split_once('=').ok_or_else(|| invalid("missing '='"))?;
        let (value, tail) = take_value(tail);
        match key.trim() {
            "uid" => user = Some(parse_principal(value).ok_or_else(|| invalid("bad uid"))?),
            "gid" => group = Some(parse_principal(value).ok_or_else(|| invalid("bad gid"))?),
            "groups" => {
                groups = split_list(value)
                    .map(parse_principal)
                    .collect::<Option<_>>()
                    .ok_or_else(|| invalid("bad group"))?;
            }
            _ => {}
        }
        rest = tail.trim_start();
    }

    Ok(Identity {
        user: user.ok_or_else(|| invalid("no uid"))?,
        group: group.ok_or_else(|| invalid("no gid"))?,
        groups,
    })
}

/// Split a field's value off `s`: everything up to the first whitespace
/// outside parentheses.
fn take_value(s: &str) -> (&str, &str) {
    let mut depth = 0usize;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ch if ch.is_whitespace() && depth == 0 => return (&s[..i], &s[i..]),
            _ => {}
        }
    }
    (s, "")
}

/// Comma-separated entries, ignoring commas inside parentheses.
fn split_list(value: &str) -> impl Iterator<Item = &str> {
    let mut depth = 0usize;
    let mut start = 0;
    let mut entries = Vec::new();
    for (i, ch) in value.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                entries.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&value[start..]);
    entries.into_iter().filter(|entry| !entry.is_empty())
}

/// `1000(alice)` or a bare `1000`.
fn parse_principal(entry: &str) -> Option<Principal> {
    let (id, name) = match entry.split_once('(') {
        Some((id, name)) => (id, Some(name.strip_suffix(')')?.to_string())),
        None => (entry, None),
    };
    Some(Principal {
        id: id.parse().ok()?,
        name,
    })
}
