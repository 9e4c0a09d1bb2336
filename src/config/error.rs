//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration file exists but could not be read, or a file named
    /// with `--config` does not exist.
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for the schema.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// The TOML error, including the offending line.
        source: toml::de::Error,
    },

    /// A merged value is out of range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Dotted key, e.g. `network.veth_prefix`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A flag naming a file or endpoint was given to an elevated process.
    #[error("{flag} is not accepted while running with elevated privileges")]
    Untrusted {
        /// The refused flag.
        flag: &'static str,
    },
}
