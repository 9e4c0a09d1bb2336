//! Configuration schema definitions.
//!
//! [`Config`] is the resolved configuration the rest of the crate reads.
//! Each file in the hierarchy is parsed into a [`ConfigLayer`], whose
//! fields are all optional, and merged on top: a key that is present
//! overrides, a key that is absent leaves the value below untouched.
//!
//! ```toml
//! [control]
//! host = "127.0.0.1"
//! port = 9051
//! password = ""
//! # cookie_file = "/run/tor/control.authcookie"
//!
//! [network]
//! veth_prefix = "vethTor"
//! max_attempts = 20
//! overlap_policy = "strict"      # or "first-mismatch"
//!
//! [redirect]
//! trans_port = 9040
//! dns_port = 9053
//!
//! [firewall]
//! iptables_path = "/sbin/iptables"
//!
//! [exec]
//! propagate_exit_code = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::firewall::RedirectPorts;
use crate::firewall::iptables::DEFAULT_IPTABLES_PATH;
use crate::netns::allocator::DEFAULT_MAX_ATTEMPTS;
use crate::netns::{OverlapPolicy, SubnetAllocator};
use crate::tor::{ControlSettings, Credentials, DEFAULT_CONTROL_HOST, DEFAULT_CONTROL_PORT};

/// Default veth name prefix.
pub const DEFAULT_VETH_PREFIX: &str = "vethTor";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Config {
    /// Tor control port.
    pub control: ControlConfig,
    /// Link naming and subnet selection.
    pub network: NetworkConfig,
    /// Redirect target ports.
    pub redirect: RedirectPorts,
    /// Packet filter.
    pub firewall: FirewallConfig,
    /// User command execution.
    pub exec: ExecConfig,
}

/// `[control]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlConfig {
    /// Control host.
    pub host: String,
    /// Control port.
    pub port: u16,
    /// Control password; empty means none.
    pub password: String,
    /// Cookie file override.
    pub cookie_file: Option<PathBuf>,
    /// Read the cookie file Tor names in `PROTOCOLINFO`. Not settable from
    /// a file; cleared when running elevated.
    pub accept_advertised_cookie: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CONTROL_HOST.to_string(),
            port: DEFAULT_CONTROL_PORT,
            password: String::new(),
            cookie_file: None,
            accept_advertised_cookie: true,
        }
    }
}

/// `[network]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkConfig {
    /// Veth names are `<prefix><pid>` and `<prefix>C<pid>`.
    pub veth_prefix: String,
    /// Candidates tried before giving up.
    pub max_attempts: u32,
    /// How candidates are checked against host networks.
    pub overlap_policy: OverlapPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            veth_prefix: DEFAULT_VETH_PREFIX.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            overlap_policy: OverlapPolicy::default(),
        }
    }
}

/// `[firewall]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirewallConfig {
    /// Location tried before searching the tool path.
    pub iptables_path: PathBuf,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            iptables_path: PathBuf::from(DEFAULT_IPTABLES_PATH),
        }
    }
}

/// `[exec]`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecConfig {
    /// Exit with the command's status instead of 0.
    pub propagate_exit_code: bool,
}

impl Config {
    /// Merge a layer into this config. Present keys override.
    pub fn merge(&mut self, layer: ConfigLayer) {
        let control = layer.control;
        merge_opt(&mut self.control.host, control.host);
        merge_opt(&mut self.control.port, control.port);
        merge_opt(&mut self.control.password, control.password);
        if control.cookie_file.is_some() {
            self.control.cookie_file = control.cookie_file;
        }

        let network = layer.network;
        merge_opt(&mut self.network.veth_prefix, network.veth_prefix);
        merge_opt(&mut self.network.max_attempts, network.max_attempts);
        merge_opt(&mut self.network.overlap_policy, network.overlap_policy);

        merge_opt(&mut self.redirect.trans_port, layer.redirect.trans_port);
        merge_opt(&mut self.redirect.dns_port, layer.redirect.dns_port);

        merge_opt(&mut self.firewall.iptables_path, layer.firewall.iptables_path);

        merge_opt(&mut self.exec.propagate_exit_code, layer.exec.propagate_exit_code);
    }

    /// Control-port settings for the Tor client.
    pub fn control_settings(&self) -> ControlSettings {
        ControlSettings {
            host: self.control.host.clone(),
            port: self.control.port,
            credentials: Credentials {
                password: self.control.password.clone(),
                cookie_file: self.control.cookie_file.clone(),
                accept_advertised_cookie: self.control.accept_advertised_cookie,
            },
        }
    }

    /// Subnet allocator for `[network]`.
    pub fn allocator(&self) -> SubnetAllocator {
        SubnetAllocator::new(self.network.max_attempts, self.network.overlap_policy)
    }
}

fn merge_opt<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// One file of the hierarchy. Absent keys leave lower layers untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// `[control]`
    #[serde(default)]
    pub control: ControlLayer,
    /// `[network]`
    #[serde(default)]
    pub network: NetworkLayer,
    /// `[redirect]`
    #[serde(default)]
    pub redirect: RedirectLayer,
    /// `[firewall]`
    #[serde(default)]
    pub firewall: FirewallLayer,
    /// `[exec]`
    #[serde(default)]
    pub exec: ExecLayer,
}

/// Partial `[control]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlLayer {
    /// Control host.
    pub host: Option<String>,
    /// Control port.
    pub port: Option<u16>,
    /// Control password.
    pub password: Option<String>,
    /// Cookie file override.
    pub cookie_file: Option<PathBuf>,
}

/// Partial `[network]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkLayer {
    /// Veth name prefix.
    pub veth_prefix: Option<String>,
    /// Candidates tried before giving up.
    pub max_attempts: Option<u32>,
    /// Overlap policy.
    pub overlap_policy: Option<OverlapPolicy>,
}

/// Partial `[redirect]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectLayer {
    /// TransPort.
    pub trans_port: Option<u16>,
    /// DNSPort.
    pub dns_port: Option<u16>,
}

/// Partial `[firewall]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallLayer {
    /// iptables location.
    pub iptables_path: Option<PathBuf>,
}

/// Partial `[exec]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecLayer {
    /// Propagate the command's exit status.
    pub propagate_exit_code: Option<bool>,
}
