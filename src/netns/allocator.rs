//! Random /30 selection for the virtual link.
//!
//! Candidates are drawn from `10.x.y.0/30` and checked against every
//! network currently assigned on the host. The acceptance rule is
//! selectable:
//!
//! - [`OverlapPolicy::Strict`] accepts a candidate only when it is disjoint
//!   from *every* assigned network.
//! - [`OverlapPolicy::FirstMismatch`] reproduces the historical behaviour:
//!   the scan stops at the first assigned network that does not overlap
//!   and accepts. A later overlapping network is never looked at, and an
//!   empty host address list never accepts anything.

use super::error::NetnsError;
use super::subnet::Subnet;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Default number of candidates tried before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Candidates always come from `10.0.0.0/8`.
const LINK_FIRST_OCTET: u8 = 10;

/// How a candidate subnet is judged against the host's assigned networks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Disjoint from every assigned network.
    #[default]
    Strict,
    /// Accept at the first non-overlapping assigned network.
    FirstMismatch,
}

/// Picks unused link subnets.
#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    max_attempts: u32,
    policy: OverlapPolicy,
}

impl Default for SubnetAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, OverlapPolicy::default())
    }
}

impl SubnetAllocator {
    /// Create an allocator.
    pub fn new(max_attempts: u32, policy: OverlapPolicy) -> Self {
        Self {
            max_attempts,
            policy,
        }
    }

    /// The acceptance policy in use.
    pub fn policy(&self) -> OverlapPolicy {
        self.policy
    }

    /// Draw one candidate `/30`.
    pub fn candidate<R: Rng + ?Sized>(&self, rng: &mut R) -> Subnet {
        let second: u8 = rng.random_range(0..=255);
        let third: u8 = rng.random_range(0..250);
        Subnet::link(Ipv4Addr::new(LINK_FIRST_OCTET, second, third, 0))
    }

    /// Judge a candidate against the host's assigned networks.
    pub fn is_free(&self, candidate: &Subnet, assigned: &[Subnet]) -> bool {
        match self.policy {
            OverlapPolicy::Strict => assigned.iter().all(|existing| {
                let clash = existing.overlaps(candidate);
                if clash {
                    debug!("{} overlaps assigned network {}", candidate, existing);
                }
                !clash
            }),
            OverlapPolicy::FirstMismatch => assigned.iter().any(|existing| {
                if existing.overlaps(candidate) {
                    debug!("{} overlaps assigned network {}", candidate, existing);
                    false
                } else {
                    true
                }
            }),
        }
    }

    /// Pick a free subnet, trying at most `max_attempts` candidates.
    pub fn allocate<R: Rng + ?Sized>(
        &self,
        assigned: &[Subnet],
        rng: &mut R,
    ) -> Result<Subnet, NetnsError> {
        for _ in 0..self.max_attempts {
            let candidate = self.candidate(rng);
            debug!("Trying subnet {}", candidate);
            if self.is_free(&candidate, assigned) {
                info!("Allocated link subnet {}", candidate);
                return Ok(candidate);
            }
        }
        Err(NetnsError::SubnetExhausted {
            attempts: self.max_attempts,
        })
    }
}
