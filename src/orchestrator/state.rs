//! Session state and the rollback ledger.

use crate::netns::{AddressPair, LinkHandle};
use std::fmt;
use std::process::ExitStatus;
use tracing::debug;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Nothing created yet.
    Init,
    /// Isolated namespace exists, loopback is up.
    NamespaceCreated,
    /// Veth pair exists in the host namespace.
    VethCreated,
    /// Host end addressed and up.
    AddressesAssigned,
    /// Isolated end moved, addressed, up and routed.
    VethMovedAndUp,
    /// NAT redirection installed.
    NatArmed,
    /// Tor listens on the host address.
    ProxyListening,
    /// The user command is running.
    Executing,
    /// Teardown in progress.
    CleaningUp,
    /// Teardown finished.
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A setup step with an inverse action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Namespace handles are held. Undone by releasing them.
    IsolatedNamespace,
    /// The veth pair may exist. Undone by deleting the host end.
    VethPair,
    /// NAT rules are installed. Undone by removing them.
    NatRedirect,
    /// Listen directives may be set. Undone by unlisten.
    ProxyListener,
}

/// The orchestrator's working set.
#[derive(Debug)]
pub struct SessionState {
    phase: Phase,
    completed: Vec<Step>,
    /// Name of the host-side veth end.
    pub host_link_name: String,
    /// Name of the isolated-side veth end.
    pub isolated_link_name: String,
    /// Host-side link handle, once created.
    pub host_link: Option<LinkHandle>,
    /// Isolated-side handle, re-resolved inside the isolated namespace.
    pub isolated_link: Option<LinkHandle>,
    /// Addresses of both ends, once allocated.
    pub addresses: Option<AddressPair>,
}

impl SessionState {
    /// Fresh state for the given link names.
    pub fn new(host_link_name: impl Into<String>, isolated_link_name: impl Into<String>) -> Self {
        Self {
            phase: Phase::Init,
            completed: Vec::new(),
            host_link_name: host_link_name.into(),
            isolated_link_name: isolated_link_name.into(),
            host_link: None,
            isolated_link: None,
            addresses: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to `phase`.
    pub fn advance(&mut self, phase: Phase) {
        debug!("Session phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Record a step in the ledger.
    pub fn record(&mut self, step: Step) {
        if !self.completed.contains(&step) {
            self.completed.push(step);
        }
    }

    /// Whether `step` is in the ledger.
    pub fn has(&self, step: Step) -> bool {
        self.completed.contains(&step)
    }

    /// Steps in the order they were recorded.
    pub fn completed(&self) -> &[Step] {
        &self.completed
    }

    /// Whether NAT rules currently exist for this session.
    pub fn nat_enabled(&self) -> bool {
        self.has(Step::NatRedirect)
    }
}

/// What teardown did not manage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Steps whose inverse was attempted, in order.
    pub attempted: Vec<Step>,
    /// One message per failed teardown action.
    pub failures: Vec<String>,
}

impl CleanupReport {
    /// Whether every teardown action succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a full session.
#[derive(Debug)]
pub struct RunOutcome {
    /// Exit status of the user command; `None` if it never ran to completion.
    pub status: Option<ExitStatus>,
    /// Teardown summary.
    pub cleanup: CleanupReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_order() {
        assert!(Phase::Init < Phase::NamespaceCreated);
        assert!(Phase::ProxyListening < Phase::Executing);
        assert!(Phase::CleaningUp < Phase::Done);
        assert_eq!(Phase::NatArmed.to_string(), "NatArmed");
    }

    #[test]
    fn test_ledger_records_once() {
        let mut state = SessionState::new("vethTor1", "vethTorC1");
        assert!(!state.nat_enabled());
        state.record(Step::VethPair);
        state.record(Step::NatRedirect);
        state.record(Step::VethPair);
        assert_eq!(state.completed(), [Step::VethPair, Step::NatRedirect]);
        assert!(state.nat_enabled());
    }
}
