//! External tool invocation.
//!
//! The namespace and firewall layers drive the host through `ip` and
//! `iptables`. Both are run the same way: the full command line is logged,
//! output is captured, and a non-zero exit becomes an error carrying stderr.
//!
//! Child processes inherit the network namespace of the *calling thread*,
//! so a command run here always acts on whichever namespace the orchestrator
//! thread currently occupies.
//!
//! These tools run as root while the environment belongs to the caller, so
//! they are located through [`TOOL_SEARCH_PATH`] and started with an
//! environment holding nothing else.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

/// The only `PATH` used to find and run host tools.
pub const TOOL_SEARCH_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Errors from running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started at all.
    #[error("Failed to run '{cmd}': {source}")]
    Spawn {
        /// The command line that was attempted.
        cmd: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The program ran but exited unsuccessfully.
    #[error("'{cmd}' failed ({status}): {stderr}")]
    Failed {
        /// The command line that failed.
        cmd: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}

/// Render a program and its arguments as a single loggable line.
pub fn command_line<S: AsRef<str>>(program: &Path, args: &[S]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg.as_ref());
    }
    line
}

/// Run a command to completion, discarding stdout.
pub fn run_checked<S: AsRef<str>>(program: &Path, args: &[S]) -> Result<(), CommandError> {
    run_capture(program, args).map(|_| ())
}

/// Run a command to completion and return its stdout.
pub fn run_capture<S: AsRef<str>>(program: &Path, args: &[S]) -> Result<String, CommandError> {
    let cmd = command_line(program, args);
    debug!("Running: {}", cmd);

    let output = Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .env_clear()
        .env("PATH", TOOL_SEARCH_PATH)
        .output()
        .map_err(|source| CommandError::Spawn {
            cmd: cmd.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(CommandError::Failed {
            cmd,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Locate a binary, preferring well-known absolute paths over a search of
/// [`TOOL_SEARCH_PATH`]. The caller's `PATH` is never consulted.
pub fn locate_binary(name: &str, well_known: &[&Path]) -> Option<PathBuf> {
    for candidate in well_known {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
    }
    which::which_in(name, Some(TOOL_SEARCH_PATH), "/").ok()
}
