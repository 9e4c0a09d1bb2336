//! Control-protocol reply framing.
//!
//! A reply is a run of status lines sharing one three-digit code:
//!
//! ```text
//! 250-TransPort=10.44.3.1:9040     mid-reply line
//! 250+DNSPort                      starts a data block...
//! 9053                             ...of raw lines...
//! .                                ...ended by a lone dot
//! 250 OK                           final line
//! ```
//!
//! The parser is lenient about data blocks: a block also ends when the next
//! line looks like a status line, since some servers omit the dot.

use super::error::TorError;

/// A complete reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code of the final line.
    pub code: u16,
    /// Text of every line before the final one, data block lines included.
    pub data: Vec<String>,
    /// Text of the final line.
    pub reply: String,
}

impl Reply {
    /// Whether the status is in the 2xx range.
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Data lines followed by the final line.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.data
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.reply.as_str()))
    }

    /// Turn a non-2xx reply into an error.
    pub fn into_result(self) -> Result<Reply, TorError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(TorError::Status {
                code: self.code,
                message: self.reply,
            })
        }
    }
}

/// Split `NNN<sep>text` into its parts.
fn status_line(line: &str) -> Option<(u16, char, &str)> {
    let code = line.get(..3)?;
    if !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sep = line[3..].chars().next()?;
    if !matches!(sep, ' ' | '-' | '+') {
        return None;
    }
    Some((code.parse().ok()?, sep, &line[4..]))
}

/// Assembles a [`Reply`] one line at a time.
#[derive(Debug, Default)]
pub struct ReplyParser {
    data: Vec<String>,
    in_block: bool,
}

impl ReplyParser {
    /// Start a fresh reply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line, without its line terminator.
    ///
    /// Returns the reply once its final line has been seen.
    pub fn push(&mut self, line: &str) -> Result<Option<Reply>, TorError> {
        if self.in_block {
            if line == "." {
                self.in_block = false;
                return Ok(None);
            }
            if status_line(line).is_none() {
                let unescaped = line.strip_prefix('.').filter(|l| l.starts_with('.'));
                self.data.push(unescaped.unwrap_or(line).to_string());
                return Ok(None);
            }
            self.in_block = false;
        }

        let (code, sep, text) =
            status_line(line).ok_or_else(|| TorError::Malformed(line.to_string()))?;
        match sep {
            '-' => {
                self.data.push(text.to_string());
                Ok(None)
            }
            '+' => {
                self.data.push(text.to_string());
                self.in_block = true;
                Ok(None)
            }
            _ => Ok(Some(Reply {
                code,
                data: std::mem::take(&mut self.data),
                reply: text.to_string(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> Reply {
        let mut parser = ReplyParser::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some(reply) = parser.push(line).unwrap() {
                assert_eq!(i, lines.len() - 1, "reply ended early");
                return reply;
            }
        }
        panic!("reply never completed");
    }

    #[test]
    fn test_single_line_reply() {
        let reply = parse(&["250 OK"]);
        assert_eq!(reply.code, 250);
        assert!(reply.data.is_empty());
        assert_eq!(reply.reply, "OK");
        assert!(reply.is_ok());
    }

    #[test]
    fn test_mid_reply_lines() {
        let reply = parse(&["250-TransPort=10.0.0.1:9040", "250 TransPort=10.0.0.5:9040"]);
        let lines: Vec<&str> = reply.lines().collect();
        assert_eq!(lines, vec!["TransPort=10.0.0.1:9040", "TransPort=10.0.0.5:9040"]);
    }

    #[test]
    fn test_data_block_terminated_by_dot() {
        let reply = parse(&["250+DNSPort", "9053", "..escaped", ".", "250 OK"]);
        assert_eq!(reply.data, vec!["DNSPort", "9053", ".escaped"]);
    }

    #[test]
    fn test_data_block_terminated_by_status_line() {
        let reply = parse(&["250+DNSPort", "9053", "250 OK"]);
        assert_eq!(reply.data, vec!["DNSPort", "9053"]);
        assert_eq!(reply.reply, "OK");
    }

    #[test]
    fn test_error_status() {
        let reply = parse(&["552 Unrecognized option: Unknown option 'Bogus'"]);
        assert!(!reply.is_ok());
        let err = reply.into_result().unwrap_err();
        assert!(matches!(err, TorError::Status { code: 552, .. }));
    }

    #[test]
    fn test_malformed_line() {
        let mut parser = ReplyParser::new();
        assert!(matches!(parser.push("hello"), Err(TorError::Malformed(_))));
        assert!(matches!(parser.push("25"), Err(TorError::Malformed(_))));
        assert!(matches!(parser.push("250?x"), Err(TorError::Malformed(_))));
    }
}
