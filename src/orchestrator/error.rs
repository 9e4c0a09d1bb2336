//! Orchestrator error types.

use crate::firewall::FirewallError;
use crate::netns::NetnsError;
use crate::privilege::PrivilegeError;
use crate::tor::TorError;
use thiserror::Error;

/// Fatal errors of a session.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The Tor control port is unreachable or refused authentication.
    #[error("Tor control port is not usable: {0}")]
    ProxyUnavailable(#[source] TorError),

    /// The packet-filter tool is missing.
    #[error("Packet filter is not usable: {0}")]
    FirewallUnavailable(#[source] FirewallError),

    /// Namespace, link, address or route setup failed.
    #[error(transparent)]
    Netns(#[from] NetnsError),

    /// NAT rules could not be installed.
    #[error(transparent)]
    Firewall(#[from] FirewallError),

    /// The proxy refused the listen directives.
    #[error(transparent)]
    Proxy(#[from] TorError),

    /// An identity change failed.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl OrchestratorError {
    /// Whether the error happened before any privileged state existed.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ProxyUnavailable(_) | OrchestratorError::FirewallUnavailable(_)
        )
    }
}
