//! Control-channel error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from talking to the Tor control port.
#[derive(Debug, Error)]
pub enum TorError {
    /// The TCP connection could not be established.
    #[error("Could not connect to the Tor control port at {addr}: {source}")]
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading or writing the control connection failed.
    #[error("Control connection I/O error: {0}")]
    Io(#[from] io::Error),

    /// The control connection was closed by Tor.
    #[error("Control connection closed")]
    Closed,

    /// Tor answered with a non-2xx status.
    #[error("Tor replied {code}: {message}")]
    Status {
        /// Three-digit status code.
        code: u16,
        /// Text of the final reply line.
        message: String,
    },

    /// A reply line did not follow the protocol.
    #[error("Malformed control reply: {0:?}")]
    Malformed(String),

    /// No usable authentication method.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The authentication cookie could not be read.
    #[error("Failed to read auth cookie {path:?}: {source}")]
    CookieRead {
        /// Cookie file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TorError {
    /// Whether the error means the session is gone rather than refused.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TorError::Io(_) | TorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_classification() {
        assert!(TorError::Closed.is_connection_lost());
        assert!(TorError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_connection_lost());
        let refused = TorError::Status {
            code: 552,
            message: "Unrecognized option".to_string(),
        };
        assert!(!refused.is_connection_lost());
        assert_eq!(refused.to_string(), "Tor replied 552: Unrecognized option");
    }
}
