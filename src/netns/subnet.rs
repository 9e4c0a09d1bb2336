//! IPv4 subnets and the point-to-point address pair carved out of them.

use super::error::NetnsError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Prefix length of every link subnet handed out by the allocator.
pub const LINK_PREFIX_LEN: u8 = 30;

/// Offset of the host-side address from the network address.
pub const HOST_OFFSET: u32 = 1;

/// Offset of the isolated-side address from the network address.
pub const ISOLATED_OFFSET: u32 = 2;

/// An IPv4 network: a masked network address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Build a subnet, masking off any host bits in `addr`.
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, NetnsError> {
        if prefix_len > 32 {
            return Err(NetnsError::InvalidSubnet(format!("{addr}/{prefix_len}")));
        }
        Ok(Self {
            network: Ipv4Addr::from(u32::from(addr) & mask_bits(prefix_len)),
            prefix_len,
        })
    }

    /// The link-sized (`/30`) subnet containing `addr`.
    pub fn link(addr: Ipv4Addr) -> Self {
        Self {
            network: Ipv4Addr::from(u32::from(addr) & mask_bits(LINK_PREFIX_LEN)),
            prefix_len: LINK_PREFIX_LEN,
        }
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// The netmask in dotted form.
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_bits(self.prefix_len))
    }

    /// Whether `addr` falls inside this subnet.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_bits(self.prefix_len) == u32::from(self.network)
    }

    /// Whether the two subnets share any address.
    ///
    /// Prefix networks are either nested or disjoint, so checking each
    /// network address against the other side is sufficient.
    pub fn overlaps(&self, other: &Subnet) -> bool {
        self.contains(other.network) || other.contains(self.network)
    }

    /// The address `offset` past the network address, if it stays inside.
    pub fn nth(&self, offset: u32) -> Option<Ipv4Addr> {
        let addr = Ipv4Addr::from(u32::from(self.network).checked_add(offset)?);
        self.contains(addr).then_some(addr)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = NetnsError;

    /// Parse `a.b.c.d/n`; a bare address is treated as `/32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, prefix),
            None => (s, "32"),
        };
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| NetnsError::InvalidSubnet(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| NetnsError::InvalidSubnet(s.to_string()))?;
        Subnet::new(addr, prefix)
    }
}

fn mask_bits(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

/// An address as assigned to an interface (`10.1.2.1/30`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceAddress {
    /// The interface address.
    pub address: Ipv4Addr,
    /// Prefix length of the attached network.
    pub prefix_len: u8,
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// The two ends of the virtual link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressPair {
    /// The subnet both addresses live in.
    pub subnet: Subnet,
    /// Host-side address (network + 1); also the isolated side's gateway.
    pub host: InterfaceAddress,
    /// Isolated-side address (network + 2).
    pub isolated: InterfaceAddress,
}

/// Derive the host and isolated addresses of a link subnet.
///
/// Fails for subnets too small to hold network + 2 (`/31`, `/32`).
pub fn derive_addresses(subnet: Subnet) -> Result<AddressPair, NetnsError> {
    let too_small = || NetnsError::InvalidSubnet(format!("{subnet} has no room for two hosts"));
    let host = subnet.nth(HOST_OFFSET).ok_or_else(too_small)?;
    let isolated = subnet.nth(ISOLATED_OFFSET).ok_or_else(too_small)?;

    Ok(AddressPair {
        subnet,
        host: InterfaceAddress {
            address: host,
            prefix_len: subnet.prefix_len(),
        },
        isolated: InterfaceAddress {
            address: isolated,
            prefix_len: subnet.prefix_len(),
        },
    })
}
