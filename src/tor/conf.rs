//! Multi-valued configuration directives.
//!
//! Options such as `TransPort` can hold several values at once. `SETCONF`
//! replaces the whole set, so the client always works on the complete list:
//! fetch it, edit it, send all of it back.

use std::fmt;

/// One keyword and its ordered set of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfEntry {
    keyword: String,
    values: Vec<String>,
}

impl ConfEntry {
    /// An entry with no values.
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            values: Vec::new(),
        }
    }

    /// Build an entry from `GETCONF` reply lines.
    ///
    /// Lines without an `=` are bare echoes of an unset option and are
    /// dropped, as are lines for any other keyword.
    pub fn from_reply_lines<'a>(keyword: &str, lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut entry = Self::new(keyword);
        for line in lines {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.eq_ignore_ascii_case(keyword) {
                entry.insert(unquote(value));
            }
        }
        entry
    }

    /// Keyword.
    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Values in order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Whether `value` is present.
    pub fn contains(&self, value: &str) -> bool {
        self.values.iter().any(|v| v == value)
    }

    /// Add `value` unless already present. Returns whether it was added.
    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        let value = value.into();
        if self.contains(&value) {
            return false;
        }
        self.values.push(value);
        true
    }

    /// Remove every occurrence of `value`. Returns whether anything changed.
    pub fn remove(&mut self, value: &str) -> bool {
        let before = self.values.len();
        self.values.retain(|v| v != value);
        self.values.len() != before
    }

    /// `SETCONF` tokens for the full set.
    ///
    /// An empty set is the bare keyword, which resets the option.
    pub fn tokens(&self) -> Vec<String> {
        if self.values.is_empty() {
            return vec![self.keyword.clone()];
        }
        self.values
            .iter()
            .map(|value| format!("{}={}", self.keyword, quote_if_needed(value)))
            .collect()
    }
}

impl fmt::Display for ConfEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens().join(" "))
    }
}

/// Wrap a string in double quotes, escaping `\` and `"`.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn quote_if_needed(value: &str) -> String {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\') {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Undo [`quote`]. Unquoted input is returned as is.
pub fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
