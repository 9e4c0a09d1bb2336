//! Session orchestration.
//!
//! One session builds the isolated network, runs the user command inside
//! it and takes everything down again:
//!
//! ```text
//! preflight     Tor reachable + authenticated, iptables present
//!     │
//! setup         capture host ns ─ create isolated ns, lo up ─ veth pair
//!     │         ─ allocate /30, host end up ─ move isolated end
//!     │         ─ isolated end up + default route ─ NAT ─ Tor listen
//!     │
//! execute       command runs in the isolated ns with dropped privileges
//!     │
//! teardown      NAT off ─ Tor unlisten ─ delete veth ─ close ns handles
//! ```
//!
//! Every setup step that leaves something behind is recorded in the
//! session ledger before (or as soon as) it takes effect. Teardown runs
//! the inverse of every recorded step, each independently of the others,
//! both after a normal run and when setup fails half way.
//!
//! All of this happens on one OS thread. [`run_session`] builds a
//! current-thread runtime so the control-channel I/O and the child wait
//! never leave the thread whose namespace membership is being switched.

pub mod error;
pub mod state;

pub use error::OrchestratorError;
pub use state::{CleanupReport, Phase, RunOutcome, SessionState, Step};

use crate::cleanup;
use crate::config::Config;
use crate::firewall::{Firewall, Iptables};
use crate::netns::{LOOPBACK, Netns, NetworkHost, SubnetAllocator, SystemNetwork, derive_addresses, veth_names};
use crate::privilege::{CommandRunner, DroppedPrivilegeRunner, Identity};
use crate::tor::{ProxyControl, TorController};
use anyhow::Context;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives one session over injected backends.
pub struct Orchestrator<N, F, P, R> {
    net: N,
    firewall: F,
    proxy: P,
    runner: R,
    allocator: SubnetAllocator,
    rng: Box<dyn RngCore>,
    state: SessionState,
}

impl<N, F, P, R> Orchestrator<N, F, P, R>
where
    N: NetworkHost,
    F: Firewall,
    P: ProxyControl,
    R: CommandRunner,
{
    /// Create an orchestrator. Nothing is touched until [`Self::run`].
    pub fn new(
        net: N,
        firewall: F,
        proxy: P,
        runner: R,
        allocator: SubnetAllocator,
        state: SessionState,
    ) -> Self {
        Self {
            net,
            firewall,
            proxy,
            runner,
            allocator,
            rng: Box::new(StdRng::from_os_rng()),
            state,
        }
    }

    /// Use `rng` for subnet selection.
    pub fn with_rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The packet-filter backend.
    pub fn firewall_mut(&mut self) -> &mut F {
        &mut self.firewall
    }

    /// Preflight, then [`Self::launch`].
    pub fn run(&mut self, command: &[String]) -> Result<RunOutcome, OrchestratorError> {
        self.preflight()?;
        self.launch(command)
    }

    /// Check the collaborators before anything privileged happens.
    pub fn preflight(&mut self) -> Result<(), OrchestratorError> {
        info!("Checking the Tor control port");
        self.proxy
            .connect()
            .map_err(OrchestratorError::ProxyUnavailable)?;
        self.firewall
            .check_available()
            .map_err(OrchestratorError::FirewallUnavailable)?;
        Ok(())
    }

    /// Build the network, run the command, tear everything down.
    ///
    /// A setup failure rolls back what was built and returns the error. A
    /// privilege failure returns immediately: nothing more is attempted at
    /// an unknown privilege level.
    pub fn launch(&mut self, command: &[String]) -> Result<RunOutcome, OrchestratorError> {
        if let Err(e) = self.setup() {
            error!("Setup failed after phase {}: {}", self.state.phase(), e);
            let report = self.teardown();
            if !report.is_clean() {
                warn!("Rollback incomplete: {}", report.failures.join("; "));
            }
            return Err(e);
        }

        let status = self.execute(command)?;
        let cleanup = self.teardown();
        Ok(RunOutcome { status, cleanup })
    }

    fn setup(&mut self) -> Result<(), OrchestratorError> {
        self.net.capture_host()?;
        self.state.record(Step::IsolatedNamespace);

        self.net.create_isolated()?;
        let lo = self.net.resolve_link(Netns::Isolated, LOOPBACK)?;
        self.net.set_link_up(&lo)?;
        self.net.enter(Netns::Host)?;
        self.state.advance(Phase::NamespaceCreated);

        self.state.record(Step::VethPair);
        let (host_link, isolated_link) = self.net.create_veth_pair(
            Netns::Host,
            &self.state.host_link_name,
            &self.state.isolated_link_name,
        )?;
        self.state.host_link = Some(host_link.clone());
        self.state.advance(Phase::VethCreated);

        let assigned = self.net.assigned_networks(Netns::Host)?;
        let subnet = self.allocator.allocate(&assigned, &mut *self.rng)?;
        let addresses = derive_addresses(subnet)?;
        self.state.addresses = Some(addresses);
        self.net.add_address(&host_link, &addresses.host)?;
        self.net.set_link_up(&host_link)?;
        self.state.advance(Phase::AddressesAssigned);

        self.net.move_link(isolated_link, Netns::Isolated)?;
        self.net.enter(Netns::Isolated)?;
        let isolated_link = self
            .net
            .resolve_link(Netns::Isolated, &self.state.isolated_link_name)?;
        self.net.add_address(&isolated_link, &addresses.isolated)?;
        self.net.set_link_up(&isolated_link)?;
        self.net
            .add_default_route(&isolated_link, addresses.host.address)?;
        self.state.isolated_link = Some(isolated_link);
        self.net.enter(Netns::Host)?;
        self.state.advance(Phase::VethMovedAndUp);

        self.firewall.install_redirect(&self.state.host_link_name)?;
        self.state.record(Step::NatRedirect);
        self.state.advance(Phase::NatArmed);

        // Issued from the isolated side; Tor lives in the host namespace and gets the host address.
        self.net.enter(Netns::Isolated)?;
        self.state.record(Step::ProxyListener);
        self.proxy.listen(addresses.host.address)?;
        self.net.enter(Netns::Host)?;
        self.state.advance(Phase::ProxyListening);

        info!(
            "Isolated network ready: {} ({}) <-> {} ({})",
            self.state.host_link_name,
            addresses.host,
            self.state.isolated_link_name,
            addresses.isolated
        );

        // The command inherits the namespace of this thread.
        self.net.enter(Netns::Isolated)?;
        Ok(())
    }

    fn execute(&mut self, command: &[String]) -> Result<Option<ExitStatus>, OrchestratorError> {
        self.state.advance(Phase::Executing);
        let status = self.runner.run(command)?;
        Ok(status)
    }

    /// Undo every recorded step. Each action runs regardless of the others.
    fn teardown(&mut self) -> CleanupReport {
        self.state.advance(Phase::CleaningUp);
        let mut report = CleanupReport::default();

        if self.net.active().is_some()
            && let Err(e) = self.net.enter(Netns::Host)
        {
            error!("Could not return to the host namespace: {}", e);
            report.failures.push(format!("enter host namespace: {e}"));
        }

        if self.state.has(Step::NatRedirect) {
            report.attempted.push(Step::NatRedirect);
            if let Err(e) = self.firewall.remove_redirect(&self.state.host_link_name) {
                warn!("NAT removal failed, continuing: {}", e);
                report.failures.push(format!("remove NAT: {e}"));
            }
        }

        if self.state.has(Step::ProxyListener)
            && let Some(addresses) = self.state.addresses
        {
            report.attempted.push(Step::ProxyListener);
            if let Err(e) = self.proxy.unlisten(addresses.host.address) {
                warn!("Tor unlisten failed, continuing: {}", e);
                report.failures.push(format!("unlisten: {e}"));
            }
        }

        if self.state.has(Step::VethPair) {
            report.attempted.push(Step::VethPair);
            let link = match self.state.host_link.take() {
                Some(link) => Ok(link),
                None => self
                    .net
                    .resolve_link(Netns::Host, &self.state.host_link_name),
            };
            if let Err(e) = link.and_then(|link| self.net.delete_link(link)) {
                warn!("Could not delete {}: {}", self.state.host_link_name, e);
                report.failures.push(format!("delete link: {e}"));
            }
            self.state.isolated_link = None;
        }

        if self.state.has(Step::IsolatedNamespace) {
            report.attempted.push(Step::IsolatedNamespace);
        }
        self.net.release();

        self.state.advance(Phase::Done);
        report
    }
}

/// Run `command` through Tor with the real backends.
///
/// Must be called from the thread that will own the namespaces for the
/// rest of the process.
pub fn run_session(
    config: &Config,
    identity: Identity,
    command: &[String],
) -> anyhow::Result<RunOutcome> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;
    let runtime = Arc::new(runtime);

    let (host_name, isolated_name) =
        veth_names(&config.network.veth_prefix, std::process::id())?;

    let net = SystemNetwork::new()?;
    let ip = net.ip_path().to_path_buf();
    let firewall = Iptables::new(&config.firewall.iptables_path, config.redirect);
    let proxy = TorController::new(config.control_settings(), config.redirect, Arc::clone(&runtime));
    let runner = DroppedPrivilegeRunner::new(identity, runtime);

    let mut orchestrator = Orchestrator::new(
        net,
        firewall,
        proxy,
        runner,
        config.allocator(),
        SessionState::new(host_name, isolated_name),
    );

    orchestrator.preflight()?;

    let stale = cleanup::collect_stale(
        &ip,
        orchestrator.firewall_mut(),
        &config.network.veth_prefix,
        false,
    );
    if !stale.is_empty() {
        info!(
            "Removed {} stale link(s) and {} stale rule(s)",
            stale.links.len(),
            stale.rules.len()
        );
    }

    let outcome = orchestrator.launch(command)?;
    if !outcome.cleanup.is_clean() {
        warn!(
            "Cleanup finished with {} problem(s); run `tor-netns cleanup` to retry",
            outcome.cleanup.failures.len()
        );
    }
    Ok(outcome)
}
