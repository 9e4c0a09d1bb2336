//! Firewall error types.

use crate::command::CommandError;
use thiserror::Error;

/// Errors from packet-filter rule management.
#[derive(Debug, Error)]
pub enum FirewallError {
    /// No iptables binary could be found.
    #[error("iptables not found (looked at {well_known} and on the tool path)")]
    NotFound {
        /// The well-known path that was checked first.
        well_known: String,
    },

    /// The binary has not been located yet.
    #[error("iptables has not been located; call check_available first")]
    NotLocated,

    /// Installing a rule failed.
    #[error("Could not create {rule} NAT rule: {source}")]
    Install {
        /// Which rule failed.
        rule: &'static str,
        /// The underlying command failure.
        #[source]
        source: CommandError,
    },

    /// Removing one or more rules failed.
    #[error("Could not delete NAT rule(s): {}", failed.join(", "))]
    Remove {
        /// Description of each failed deletion.
        failed: Vec<String>,
    },

    /// Listing rules failed.
    #[error(transparent)]
    Command(#[from] CommandError),
}
