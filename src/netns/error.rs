//! Error types for namespace, link and address operations.

use super::Netns;
use crate::command::CommandError;
use thiserror::Error;

/// Errors raised while building or tearing down the isolated network.
#[derive(Debug, Error)]
pub enum NetnsError {
    /// A namespace syscall failed.
    #[error("{op} failed: {source}")]
    Syscall {
        /// The operation that failed (`unshare`, `setns`, ...).
        op: &'static str,
        /// The errno returned by the kernel.
        #[source]
        source: nix::Error,
    },

    /// Opening a namespace handle failed.
    #[error("Failed to open namespace handle {path}: {source}")]
    OpenHandle {
        /// The procfs path that was opened.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A namespace was used before it was created or after it was released.
    #[error("The {0} namespace is not available")]
    MissingNamespace(Netns),

    /// An operation targeted a namespace the worker thread is not in.
    #[error("Operation requires the {expected} namespace but the worker is in {active}")]
    WrongNamespace {
        /// Namespace the operation needs.
        expected: Netns,
        /// Namespace the thread currently occupies, if any.
        active: String,
    },

    /// Namespace state was touched from a thread other than its owner.
    #[error("Namespace operations must stay on the thread that created them")]
    WrongThread,

    /// A link could not be found by name.
    #[error("Link '{name}' not found in the {netns} namespace: {source}")]
    LinkNotFound {
        /// Interface name.
        name: String,
        /// Namespace that was searched.
        netns: Netns,
        /// The underlying lookup error.
        #[source]
        source: nix::Error,
    },

    /// Generated interface name exceeds the kernel limit.
    #[error("Interface name '{name}' is longer than 15 bytes")]
    InterfaceNameTooLong {
        /// The offending name.
        name: String,
    },

    /// The `ip` tool could not be found.
    #[error("The 'ip' tool (iproute2) was not found")]
    IpNotFound,

    /// An `ip` invocation failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A subnet string or prefix was invalid.
    #[error("Invalid subnet: {0}")]
    InvalidSubnet(String),

    /// No free subnet was found within the retry bound.
    #[error("Could not find a free subnet after {attempts} attempts")]
    SubnetExhausted {
        /// Number of candidates tried.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_namespace_display() {
        let err = NetnsError::WrongNamespace {
            expected: Netns::Isolated,
            active: "host".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("isolated"));
        assert!(msg.contains("host"));
    }

    #[test]
    fn test_exhausted_display() {
        let err = NetnsError::SubnetExhausted { attempts: 20 };
        assert!(err.to_string().contains("20 attempts"));
    }
}
