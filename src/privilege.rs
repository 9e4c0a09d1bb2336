//! Privilege bracketing around the user command.
//!
//! The process normally runs set-uid root (or under sudo). Setup and
//! teardown need that privilege; the user's command must not have it.
//!
//! ```text
//!   captured      (real, effective, saved)
//!   drop          (real, real,      effective)   gid first, then uid
//!   spawn + wait  child execs; execve resets its saved ids to `real`
//!   restore       (real, effective, saved)       uid first, then gid
//! ```
//!
//! Any failure to change identity is fatal. Continuing at the wrong
//! privilege level is never an option.

use nix::unistd::{Gid, Uid, getresgid, getresuid, setresgid, setresuid};
use std::process::ExitStatus;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Runtime;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

/// Errors from identity changes.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// Reading the current identity failed.
    #[error("Failed to read process identity: {0}")]
    Capture(#[source] nix::Error),

    /// Switching to the unprivileged identity failed.
    #[error("Failed to drop privileges ({what}): {source}")]
    Drop {
        /// Which call failed.
        what: &'static str,
        /// The errno.
        #[source]
        source: nix::Error,
    },

    /// Switching back to the privileged identity failed.
    #[error("Failed to restore privileges ({what}): {source}")]
    Restore {
        /// Which call failed.
        what: &'static str,
        /// The errno.
        #[source]
        source: nix::Error,
    },

    /// Installing the signal handlers failed.
    #[error("Failed to install signal handlers: {0}")]
    Signal(#[source] std::io::Error),

    /// No program was given.
    #[error("No command to run")]
    EmptyCommand,
}

/// User and group ids captured at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    /// Real uid: the invoking user.
    pub real_uid: Uid,
    /// Effective uid: the privileged identity.
    pub effective_uid: Uid,
    /// Saved set-user-ID.
    pub saved_uid: Uid,
    /// Real gid.
    pub real_gid: Gid,
    /// Effective gid.
    pub effective_gid: Gid,
    /// Saved set-group-ID.
    pub saved_gid: Gid,
}

impl Identity {
    /// Read the process identity. Call before any privileged setup.
    pub fn capture() -> Result<Self, PrivilegeError> {
        let uids = getresuid().map_err(PrivilegeError::Capture)?;
        let gids = getresgid().map_err(PrivilegeError::Capture)?;
        let identity = Self {
            real_uid: uids.real,
            effective_uid: uids.effective,
            saved_uid: uids.saved,
            real_gid: gids.real,
            effective_gid: gids.effective,
            saved_gid: gids.saved,
        };
        debug!("Captured identity {:?}", identity);
        Ok(identity)
    }

    /// Whether effective and real identities differ.
    pub fn is_elevated(&self) -> bool {
        self.real_uid != self.effective_uid || self.real_gid != self.effective_gid
    }

    /// Switch effective ids to the real ones, keeping the privileged id saved.
    pub fn drop_privileges(&self) -> Result<(), PrivilegeError> {
        info!("Setting uid {} gid {}", self.real_uid, self.real_gid);
        setresgid(self.real_gid, self.real_gid, self.effective_gid).map_err(|source| {
            PrivilegeError::Drop {
                what: "setresgid",
                source,
            }
        })?;
        setresuid(self.real_uid, self.real_uid, self.effective_uid).map_err(|source| {
            PrivilegeError::Drop {
                what: "setresuid",
                source,
            }
        })
    }

    /// Return to exactly the captured identity.
    pub fn restore(&self) -> Result<(), PrivilegeError> {
        info!("Setting uid {} gid {}", self.effective_uid, self.effective_gid);
        setresuid(self.real_uid, self.effective_uid, self.saved_uid).map_err(|source| {
            PrivilegeError::Restore {
                what: "setresuid",
                source,
            }
        })?;
        setresgid(self.real_gid, self.effective_gid, self.saved_gid).map_err(|source| {
            PrivilegeError::Restore {
                what: "setresgid",
                source,
            }
        })
    }
}

/// Runs the user command.
pub trait CommandRunner {
    /// Run `command` to completion.
    ///
    /// `Ok(None)` means the command could not be started; that is logged,
    /// not fatal. An `Err` is a privilege failure and is always fatal.
    fn run(&mut self, command: &[String]) -> Result<Option<ExitStatus>, PrivilegeError>;
}

/// [`CommandRunner`] that drops to the real identity for the child's lifetime.
///
/// The child inherits stdin, stdout, stderr and the calling thread's
/// network namespace. SIGINT and SIGTERM sent to this process while the
/// child runs are logged and otherwise ignored, so teardown still happens
/// after the child exits.
pub struct DroppedPrivilegeRunner {
    identity: Identity,
    runtime: Arc<Runtime>,
}

impl DroppedPrivilegeRunner {
    /// Create a runner for `identity`.
    pub fn new(identity: Identity, runtime: Arc<Runtime>) -> Self {
        Self { identity, runtime }
    }

    async fn spawn_and_wait(command: &[String]) -> Result<Option<ExitStatus>, PrivilegeError> {
        let (program, args) = command.split_first().ok_or(PrivilegeError::EmptyCommand)?;

        let mut interrupt = signal(SignalKind::interrupt()).map_err(PrivilegeError::Signal)?;
        let mut terminate = signal(SignalKind::terminate()).map_err(PrivilegeError::Signal)?;

        info!("Running {:?}", command);
        let mut child = match tokio::process::Command::new(program).args(args).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start {}: {}", program, e);
                return Ok(None);
            }
        };

        loop {
            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(status) => Ok(Some(status)),
                        Err(e) => {
                            error!("Failed to wait for {}: {}", program, e);
                            Ok(None)
                        }
                    };
                }
                _ = interrupt.recv() => warn!("SIGINT received; waiting for the command to exit"),
                _ = terminate.recv() => warn!("SIGTERM received; waiting for the command to exit"),
            }
        }
    }
}

impl CommandRunner for DroppedPrivilegeRunner {
    fn run(&mut self, command: &[String]) -> Result<Option<ExitStatus>, PrivilegeError> {
        if command.is_empty() {
            return Err(PrivilegeError::EmptyCommand);
        }

        self.identity.drop_privileges()?;
        let outcome = self.runtime.block_on(Self::spawn_and_wait(command));
        self.identity.restore()?;

        let status = outcome?;
        match status {
            Some(status) => info!("Command finished: {}", status),
            None => warn!("Command did not run to completion"),
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> DroppedPrivilegeRunner {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        DroppedPrivilegeRunner::new(Identity::capture().unwrap(), Arc::new(runtime))
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_capture_matches_process() {
        let identity = Identity::capture().unwrap();
        assert_eq!(identity.real_uid, Uid::current());
        assert_eq!(identity.effective_uid, Uid::effective());
        assert_eq!(identity.real_gid, Gid::current());
    }

    #[test]
    fn test_bracket_restores_identity_after_success() {
        let before = Identity::capture().unwrap();
        let status = runner().run(&argv(&["true"])).unwrap();
        assert!(status.unwrap().success());
        assert_eq!(Identity::capture().unwrap(), before);
    }

    #[test]
    fn test_bracket_restores_identity_after_failure() {
        let before = Identity::capture().unwrap();
        let status = runner().run(&argv(&["sh", "-c", "exit 7"])).unwrap();
        assert_eq!(status.unwrap().code(), Some(7));
        assert_eq!(Identity::capture().unwrap(), before);
    }

    #[test]
    fn test_bracket_restores_identity_when_spawn_fails() {
        let before = Identity::capture().unwrap();
        let status = runner()
            .run(&argv(&["/definitely/not/a/program"]))
            .unwrap();
        assert!(status.is_none());
        assert_eq!(Identity::capture().unwrap(), before);
    }

    #[test]
    fn test_empty_command() {
        let err = runner().run(&[]).unwrap_err();
        assert!(matches!(err, PrivilegeError::EmptyCommand));
    }
}
