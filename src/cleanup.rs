//! Garbage collection for crashed sessions.
//!
//! A session killed with SIGKILL (or by a power loss) never reaches its
//! teardown. It leaves behind:
//!
//! - a host-side veth named `<prefix><pid>` (or, if it died before the
//!   move, the `<prefix>C<pid>` end as well)
//! - `nat PREROUTING` redirect rules scoped to that interface, which outlive
//!   the interface itself
//!
//! Both carry the owning pid in their name, so anything whose pid is gone
//! can be removed. This runs at the start of every session and from the
//! `cleanup` subcommand.

use crate::command::{run_capture, run_checked};
use crate::firewall::Iptables;
use crate::firewall::iptables::PreroutingRule;
use crate::netns::system::parse_link_names;
use std::path::Path;
use tracing::{debug, info, warn};

/// Leftovers found (and, unless dry-running, removed).
#[derive(Debug, Default)]
pub struct StaleResources {
    /// Stale interface names.
    pub links: Vec<String>,
    /// Stale NAT rules.
    pub rules: Vec<PreroutingRule>,
}

impl StaleResources {
    /// Whether nothing stale was found.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty() && self.rules.is_empty()
    }
}

/// Pid encoded in one of our interface names, if `name` is one.
pub fn owner_pid(name: &str, prefix: &str) -> Option<u32> {
    let rest = name.strip_prefix(prefix)?;
    let digits = rest.strip_prefix('C').unwrap_or(rest);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Check if a process with the given PID exists.
fn process_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

/// Whether `name` is one of ours and its owner is gone.
pub fn is_stale(name: &str, prefix: &str) -> bool {
    match owner_pid(name, prefix) {
        Some(pid) if process_exists(pid) => {
            debug!("{} still belongs to running process {}", name, pid);
            false
        }
        Some(_) => true,
        None => false,
    }
}

/// Find and (unless `dry_run`) remove leftovers of dead sessions.
///
/// Best effort: every failure is logged and skipped.
pub fn collect_stale(
    ip: &Path,
    iptables: &mut Iptables,
    prefix: &str,
    dry_run: bool,
) -> StaleResources {
    info!("Checking for stale resources from crashed sessions");
    let mut found = StaleResources::default();

    match run_capture(ip, &["-o", "link", "show"]) {
        Ok(output) => {
            for name in parse_link_names(&output) {
                if !is_stale(&name, prefix) {
                    continue;
                }
                if !dry_run {
                    info!("Cleaning up stale link: {}", name);
                    if let Err(e) = run_checked(ip, &["link", "del", "dev", &name]) {
                        warn!("Failed to delete stale link {}: {}", name, e);
                        continue;
                    }
                }
                found.links.push(name);
            }
        }
        Err(e) => warn!("Cannot list links: {}", e),
    }

    match iptables.list_prerouting() {
        Ok(rules) => {
            for rule in rules {
                let Some(interface) = rule.interface.as_deref() else {
                    continue;
                };
                if !is_stale(interface, prefix) {
                    continue;
                }
                if !dry_run {
                    info!("Cleaning up stale NAT rule on {}", interface);
                    if let Err(e) = iptables.delete_rule(&rule) {
                        warn!("Failed to delete stale rule on {}: {}", interface, e);
                        continue;
                    }
                }
                found.rules.push(rule);
            }
        }
        Err(e) => warn!("Cannot list NAT rules: {}", e),
    }

    found
}
