//! Network namespace, virtual link and address management.
//!
//! # Network Architecture
//!
//! ```text
//! Host Network Namespace               Isolated Network Namespace
//! ──────────────────────────────       ──────────────────────────────
//!
//!   Tor  TransPort 10.x.y.1:9040          vethTorC<pid>  10.x.y.2/30
//!        DNSPort   10.x.y.1:9053               │  default via 10.x.y.1
//!          ▲                                   │
//!          │ nat PREROUTING REDIRECT           │
//!          │                                   │
//!   vethTor<pid>  10.x.y.1/30 ◄────────────────┘
//! ```
//!
//! # Per-thread Membership
//!
//! Namespace membership belongs to the calling OS thread, not the process.
//! Everything in this module therefore runs on a single thread, and every
//! namespace-sensitive operation names the namespace it expects to run in.
//! The [`NetworkHost`] implementation refuses the operation when the worker
//! is somewhere else, which turns a silent misconfiguration into an error.
//!
//! Link handles are namespace-scoped as well: a [`LinkHandle`] records the
//! namespace it was resolved in, and moving a link consumes its handle, so
//! the moved end has to be resolved again from inside its new namespace.

pub mod allocator;
pub mod error;
pub mod subnet;
pub mod system;

pub use allocator::{OverlapPolicy, SubnetAllocator};
pub use error::NetnsError;
pub use subnet::{AddressPair, InterfaceAddress, Subnet, derive_addresses};
pub use system::SystemNetwork;

use std::fmt;
use std::net::Ipv4Addr;

/// Name of the loopback interface brought up in the isolated namespace.
pub const LOOPBACK: &str = "lo";

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_IFNAME_LEN: usize = 15;

/// The two namespaces a session deals with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Netns {
    /// The namespace the process started in.
    Host,
    /// The anonymous namespace created for the command.
    Isolated,
}

impl fmt::Display for Netns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Netns::Host => write!(f, "host"),
            Netns::Isolated => write!(f, "isolated"),
        }
    }
}

/// A network interface as seen from one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    name: String,
    index: u32,
    netns: Netns,
}

impl LinkHandle {
    /// Create a handle for an interface resolved in `netns`.
    pub fn new(name: impl Into<String>, index: u32, netns: Netns) -> Self {
        Self {
            name: name.into(),
            index,
            netns,
        }
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface index within its namespace.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Namespace the handle was resolved in.
    pub fn netns(&self) -> Netns {
        self.netns
    }
}

/// Kernel-facing operations the orchestrator needs.
///
/// Implementations track which namespace the worker thread occupies. Every
/// operation that takes a [`Netns`] or a [`LinkHandle`] must fail with
/// [`NetnsError::WrongNamespace`] if the worker is not in that namespace.
pub trait NetworkHost {
    /// Namespace the worker currently occupies, if any handle exists yet.
    fn active(&self) -> Option<Netns>;

    /// Capture a handle to the namespace the worker is in now (the host).
    fn capture_host(&mut self) -> Result<(), NetnsError>;

    /// Create the isolated namespace. The worker is left inside it.
    fn create_isolated(&mut self) -> Result<(), NetnsError>;

    /// Move the worker into `target`. A no-op if it is already there.
    fn enter(&mut self, target: Netns) -> Result<(), NetnsError>;

    /// Every IPv4 network assigned to any interface in `netns`.
    fn assigned_networks(&mut self, netns: Netns) -> Result<Vec<Subnet>, NetnsError>;

    /// Create a veth pair in `netns`, returning handles to both ends.
    fn create_veth_pair(
        &mut self,
        netns: Netns,
        name: &str,
        peer: &str,
    ) -> Result<(LinkHandle, LinkHandle), NetnsError>;

    /// Look an interface up by name in `netns`.
    fn resolve_link(&mut self, netns: Netns, name: &str) -> Result<LinkHandle, NetnsError>;

    /// Assign an address to a link.
    fn add_address(&mut self, link: &LinkHandle, addr: &InterfaceAddress)
    -> Result<(), NetnsError>;

    /// Bring a link up.
    fn set_link_up(&mut self, link: &LinkHandle) -> Result<(), NetnsError>;

    /// Move a link into `target`. The handle is consumed.
    fn move_link(&mut self, link: LinkHandle, target: Netns) -> Result<(), NetnsError>;

    /// Install a default route through `gateway` on `link`.
    fn add_default_route(&mut self, link: &LinkHandle, gateway: Ipv4Addr)
    -> Result<(), NetnsError>;

    /// Delete a link. Deleting one end of a veth pair removes both.
    fn delete_link(&mut self, link: LinkHandle) -> Result<(), NetnsError>;

    /// Close both namespace handles.
    ///
    /// This does not destroy the isolated namespace; it lives on until its
    /// last reference (for example a still-running child) goes away.
    fn release(&mut self);
}

/// Check that the worker is in `expected`.
pub fn ensure_active(active: Option<Netns>, expected: Netns) -> Result<(), NetnsError> {
    match active {
        Some(current) if current == expected => Ok(()),
        other => Err(NetnsError::WrongNamespace {
            expected,
            active: other.map_or_else(|| "no namespace".to_string(), |ns| ns.to_string()),
        }),
    }
}

/// Generate the veth names for a process: `<prefix><pid>` and `<prefix>C<pid>`.
pub fn veth_names(prefix: &str, pid: u32) -> Result<(String, String), NetnsError> {
    let host = format!("{prefix}{pid}");
    let isolated = format!("{prefix}C{pid}");
    for name in [&host, &isolated] {
        if name.len() > MAX_IFNAME_LEN {
            return Err(NetnsError::InterfaceNameTooLong { name: name.clone() });
        }
    }
    Ok((host, isolated))
}
