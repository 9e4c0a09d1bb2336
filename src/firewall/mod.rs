//! NAT redirection of the isolated namespace's traffic.
//!
//! Two rules go into the `nat` table's `PREROUTING` chain, both scoped to
//! the host-side veth interface:
//!
//! ```text
//! -i vethTor<pid> -p tcp --syn          -j REDIRECT --to-ports 9040  (TransPort)
//! -i vethTor<pid> -p udp --dport 53     -j REDIRECT --to-ports 9053  (DNSPort)
//! ```
//!
//! Installing is all-or-nothing; removal is best effort and always tries
//! both rules.

pub mod error;
pub mod iptables;

pub use error::FirewallError;
pub use iptables::Iptables;

use serde::{Deserialize, Serialize};

/// Default transparent-proxy port.
pub const DEFAULT_TRANS_PORT: u16 = 9040;

/// Default DNS-proxy port.
pub const DEFAULT_DNS_PORT: u16 = 9053;

/// Standard DNS port matched by the UDP rule.
pub const DNS_PORT: u16 = 53;

/// Local ports the redirected traffic is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPorts {
    /// Port of the proxy's transparent TCP listener.
    pub trans_port: u16,
    /// Port of the proxy's DNS listener.
    pub dns_port: u16,
}

impl Default for RedirectPorts {
    fn default() -> Self {
        Self {
            trans_port: DEFAULT_TRANS_PORT,
            dns_port: DEFAULT_DNS_PORT,
        }
    }
}

/// Append or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`
    Append,
    /// `-D`
    Delete,
}

impl RuleAction {
    fn flag(self) -> &'static str {
        match self {
            RuleAction::Append => "-A",
            RuleAction::Delete => "-D",
        }
    }
}

/// The two redirection rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectRule {
    /// New TCP connections to the transparent port.
    Tcp,
    /// UDP DNS queries to the DNS port.
    Dns,
}

impl RedirectRule {
    /// Both rules, in installation order.
    pub const ALL: [RedirectRule; 2] = [RedirectRule::Tcp, RedirectRule::Dns];

    /// Short label for log and error messages.
    pub fn label(self) -> &'static str {
        match self {
            RedirectRule::Tcp => "TCP",
            RedirectRule::Dns => "DNS",
        }
    }

    /// iptables arguments for this rule.
    pub fn args(self, action: RuleAction, interface: &str, ports: &RedirectPorts) -> Vec<String> {
        let mut args: Vec<String> = ["-t", "nat", action.flag(), "PREROUTING", "-i", interface]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let (matcher, port) = match self {
            RedirectRule::Tcp => (vec!["-p".to_string(), "tcp".into(), "--syn".into()], ports.trans_port),
            RedirectRule::Dns => (
                vec!["-p".to_string(), "udp".into(), "--dport".into(), DNS_PORT.to_string()],
                ports.dns_port,
            ),
        };
        args.extend(matcher);
        args.extend(["-j".to_string(), "REDIRECT".into(), "--to-ports".into(), port.to_string()]);
        args
    }
}

/// Packet-filter operations the orchestrator needs.
pub trait Firewall {
    /// Make sure the rule tool is present. Called before any privileged setup.
    fn check_available(&mut self) -> Result<(), FirewallError>;

    /// Install both redirection rules for `interface`.
    ///
    /// On failure no rule installed by this call is left behind.
    fn install_redirect(&mut self, interface: &str) -> Result<(), FirewallError>;

    /// Remove both redirection rules for `interface`, attempting each.
    fn remove_redirect(&mut self, interface: &str) -> Result<(), FirewallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_rule_args() {
        let args = RedirectRule::Tcp.args(RuleAction::Append, "vethTor42", &RedirectPorts::default());
        assert_eq!(
            args.join(" "),
            "-t nat -A PREROUTING -i vethTor42 -p tcp --syn -j REDIRECT --to-ports 9040"
        );
    }

    #[test]
    fn test_dns_rule_args() {
        let args = RedirectRule::Dns.args(RuleAction::Delete, "vethTor42", &RedirectPorts::default());
        assert_eq!(
            args.join(" "),
            "-t nat -D PREROUTING -i vethTor42 -p udp --dport 53 -j REDIRECT --to-ports 9053"
        );
    }

    #[test]
    fn test_delete_mirrors_append() {
        let ports = RedirectPorts {
            trans_port: 9140,
            dns_port: 9153,
        };
        for rule in RedirectRule::ALL {
            let add = rule.args(RuleAction::Append, "v", &ports);
            let del = rule.args(RuleAction::Delete, "v", &ports);
            assert_eq!(add.len(), del.len());
            let differing: Vec<_> = add.iter().zip(&del).filter(|(a, d)| a != d).collect();
            assert_eq!(differing, vec![(&"-A".to_string(), &"-D".to_string())]);
        }
    }
}
