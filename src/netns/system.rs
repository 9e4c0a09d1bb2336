//! [`NetworkHost`] backed by the running kernel.
//!
//! Namespace switches go through `unshare(2)`/`setns(2)` on the calling
//! thread. Link, address and route changes are made with the `ip` tool,
//! which inherits the thread's current namespace when it is spawned.
//!
//! # Requirements
//!
//! - `CAP_NET_ADMIN` and `CAP_SYS_ADMIN` (in practice: root)
//! - `ip` from iproute2

use super::{InterfaceAddress, LinkHandle, Netns, NetnsError, NetworkHost, Subnet, ensure_active};
use crate::command::{locate_binary, run_capture, run_checked};
use nix::net::if_::if_nametoindex;
use nix::sched::{CloneFlags, setns, unshare};
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread::{self, ThreadId};
use tracing::{debug, info};

/// Per-thread namespace link in procfs.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Places `ip` is looked for before searching the tool path.
const IP_WELL_KNOWN: [&str; 3] = ["/sbin/ip", "/usr/sbin/ip", "/bin/ip"];

/// MTU of both veth ends.
const VETH_MTU: &str = "1500";

/// Kernel-backed namespace and link management.
///
/// Bound to the thread that created it: namespace membership is per-thread,
/// so every operation checks it is still running on that thread.
pub struct SystemNetwork {
    ip: PathBuf,
    host: Option<File>,
    isolated: Option<File>,
    active: Option<Netns>,
    owner: ThreadId,
}

impl SystemNetwork {
    /// Bind to the current thread and locate the `ip` tool.
    pub fn new() -> Result<Self, NetnsError> {
        let ip = locate_ip()?;
        debug!("Using ip tool at {:?}", ip);

        Ok(Self {
            ip,
            host: None,
            isolated: None,
            active: None,
            owner: thread::current().id(),
        })
    }

    /// Path of the `ip` tool in use.
    pub fn ip_path(&self) -> &Path {
        &self.ip
    }

    fn check_thread(&self) -> Result<(), NetnsError> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(NetnsError::WrongThread)
        }
    }

    fn require(&self, netns: Netns) -> Result<(), NetnsError> {
        self.check_thread()?;
        ensure_active(self.active, netns)
    }

    fn handle(&self, netns: Netns) -> Result<&File, NetnsError> {
        let handle = match netns {
            Netns::Host => self.host.as_ref(),
            Netns::Isolated => self.isolated.as_ref(),
        };
        handle.ok_or(NetnsError::MissingNamespace(netns))
    }

    fn ip(&self, args: &[&str]) -> Result<(), NetnsError> {
        run_checked(&self.ip, args)?;
        Ok(())
    }
}

/// Find the `ip` tool.
pub fn locate_ip() -> Result<PathBuf, NetnsError> {
    let well_known: Vec<&Path> = IP_WELL_KNOWN.iter().map(Path::new).collect();
    locate_binary("ip", &well_known).ok_or(NetnsError::IpNotFound)
}

fn open_current() -> Result<File, NetnsError> {
    File::open(THREAD_NETNS).map_err(|source| NetnsError::OpenHandle {
        path: THREAD_NETNS.to_string(),
        source,
    })
}

impl NetworkHost for SystemNetwork {
    fn active(&self) -> Option<Netns> {
        self.active
    }

    fn capture_host(&mut self) -> Result<(), NetnsError> {
        self.check_thread()?;
        self.host = Some(open_current()?);
        self.active = Some(Netns::Host);
        debug!("Captured host namespace handle");
        Ok(())
    }

    fn create_isolated(&mut self) -> Result<(), NetnsError> {
        self.require(Netns::Host)?;
        info!("Creating isolated network namespace");
        unshare(CloneFlags::CLONE_NEWNET).map_err(|source| NetnsError::Syscall {
            op: "unshare(CLONE_NEWNET)",
            source,
        })?;
        self.active = Some(Netns::Isolated);
        let handle = open_current()?;
        debug!("Isolated namespace handle is fd {}", handle.as_raw_fd());
        self.isolated = Some(handle);
        Ok(())
    }

    fn enter(&mut self, target: Netns) -> Result<(), NetnsError> {
        self.check_thread()?;
        if self.active == Some(target) {
            debug!("Already in the {} namespace", target);
            return Ok(());
        }
        debug!("Switching to the {} namespace", target);
        setns(self.handle(target)?, CloneFlags::CLONE_NEWNET).map_err(|source| {
            NetnsError::Syscall {
                op: "setns(CLONE_NEWNET)",
                source,
            }
        })?;
        self.active = Some(target);
        Ok(())
    }

    fn assigned_networks(&mut self, netns: Netns) -> Result<Vec<Subnet>, NetnsError> {
        self.require(netns)?;
        let output = run_capture(&self.ip, &["-o", "-4", "addr", "show"])?;
        Ok(parse_ipv4_addresses(&output))
    }

    fn create_veth_pair(
        &mut self,
        netns: Netns,
        name: &str,
        peer: &str,
    ) -> Result<(LinkHandle, LinkHandle), NetnsError> {
        self.require(netns)?;
        info!("Creating veth pair {} <-> {}", name, peer);
        self.ip(&[
            "link", "add", name, "mtu", VETH_MTU, "type", "veth", "peer", "name", peer,
        ])?;
        Ok((self.resolve_link(netns, name)?, self.resolve_link(netns, peer)?))
    }

    fn resolve_link(&mut self, netns: Netns, name: &str) -> Result<LinkHandle, NetnsError> {
        self.require(netns)?;
        let index = if_nametoindex(name).map_err(|source| NetnsError::LinkNotFound {
            name: name.to_string(),
            netns,
            source,
        })?;
        Ok(LinkHandle::new(name, index, netns))
    }

    fn add_address(
        &mut self,
        link: &LinkHandle,
        addr: &InterfaceAddress,
    ) -> Result<(), NetnsError> {
        self.require(link.netns())?;
        info!("Assigning {} to {}", addr, link.name());
        self.ip(&["addr", "add", &addr.to_string(), "dev", link.name()])
    }

    fn set_link_up(&mut self, link: &LinkHandle) -> Result<(), NetnsError> {
        self.require(link.netns())?;
        self.ip(&["link", "set", "dev", link.name(), "up"])
    }

    fn move_link(&mut self, link: LinkHandle, target: Netns) -> Result<(), NetnsError> {
        self.require(link.netns())?;
        // The handle is close-on-exec, so `ip` reaches it through our fd table.
        let target_path = format!(
            "/proc/{}/fd/{}",
            std::process::id(),
            self.handle(target)?.as_raw_fd()
        );
        info!("Moving {} into the {} namespace", link.name(), target);
        self.ip(&["link", "set", "dev", link.name(), "netns", &target_path])
    }

    fn add_default_route(
        &mut self,
        link: &LinkHandle,
        gateway: Ipv4Addr,
    ) -> Result<(), NetnsError> {
        self.require(link.netns())?;
        info!("Adding default route via {} on {}", gateway, link.name());
        self.ip(&[
            "route",
            "add",
            "default",
            "via",
            &gateway.to_string(),
            "dev",
            link.name(),
        ])
    }

    fn delete_link(&mut self, link: LinkHandle) -> Result<(), NetnsError> {
        self.require(link.netns())?;
        info!("Deleting link {}", link.name());
        self.ip(&["link", "del", "dev", link.name()])
    }

    fn release(&mut self) {
        if self.isolated.take().is_some() {
            debug!("Closed isolated namespace handle");
        }
        if self.host.take().is_some() {
            debug!("Closed host namespace handle");
        }
    }
}

/// Extract IPv4 networks from `ip -o -4 addr show` output.
pub fn parse_ipv4_addresses(output: &str) -> Vec<Subnet> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|token| *token == "inet")?;
            tokens.next()?.parse().ok()
        })
        .collect()
}

/// Extract interface names from `ip -o link show` output.
pub fn parse_link_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let name = line.split_whitespace().nth(1)?.trim_end_matches(':');
            // Veth ends are listed as `name@peer`.
            let name = name.split('@').next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}
