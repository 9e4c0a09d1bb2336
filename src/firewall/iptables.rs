//! [`Firewall`] backed by the `iptables` binary.

use super::{Firewall, FirewallError, RedirectPorts, RedirectRule, RuleAction};
use crate::command::{CommandError, locate_binary, run_capture, run_checked};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Well-known location tried before searching the tool path.
pub const DEFAULT_IPTABLES_PATH: &str = "/sbin/iptables";

/// A rule in the `nat` table's `PREROUTING` chain, as printed by `iptables -S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreroutingRule {
    /// Input interface the rule is scoped to (`-i`), if any.
    pub interface: Option<String>,
    /// Rule specification following `-A PREROUTING`.
    pub spec: Vec<String>,
}

impl PreroutingRule {
    /// Arguments that delete this rule.
    pub fn delete_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-t", "nat", "-D", "PREROUTING"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.extend(self.spec.iter().cloned());
        args
    }
}

/// iptables rule management.
pub struct Iptables {
    well_known: PathBuf,
    path: Option<PathBuf>,
    ports: RedirectPorts,
}

impl Iptables {
    /// Create a manager that will look at `well_known` before the tool path.
    pub fn new(well_known: impl Into<PathBuf>, ports: RedirectPorts) -> Self {
        Self {
            well_known: well_known.into(),
            path: None,
            ports,
        }
    }

    /// Redirect ports in use.
    pub fn ports(&self) -> &RedirectPorts {
        &self.ports
    }

    fn binary(&self) -> Result<&Path, FirewallError> {
        self.path.as_deref().ok_or(FirewallError::NotLocated)
    }

    fn apply(&self, rule: RedirectRule, action: RuleAction, interface: &str) -> Result<(), CommandError> {
        // Only reached after check_available has stored the path.
        let binary = self.path.as_deref().unwrap_or(self.well_known.as_path());
        run_checked(binary, &rule.args(action, interface, &self.ports))
    }

    /// List every rule in `nat PREROUTING`.
    pub fn list_prerouting(&mut self) -> Result<Vec<PreroutingRule>, FirewallError> {
        self.check_available()?;
        let output = run_capture(self.binary()?, &["-t", "nat", "-S", "PREROUTING"])?;
        Ok(parse_prerouting_rules(&output))
    }

    /// Delete one previously listed rule.
    pub fn delete_rule(&mut self, rule: &PreroutingRule) -> Result<(), FirewallError> {
        self.check_available()?;
        run_checked(self.binary()?, &rule.delete_args())?;
        Ok(())
    }
}

impl Firewall for Iptables {
    fn check_available(&mut self) -> Result<(), FirewallError> {
        if self.path.is_some() {
            return Ok(());
        }
        let path = locate_binary("iptables", &[self.well_known.as_path()]).ok_or_else(|| {
            FirewallError::NotFound {
                well_known: self.well_known.display().to_string(),
            }
        })?;
        debug!("Using iptables at {:?}", path);
        self.path = Some(path);
        Ok(())
    }

    fn install_redirect(&mut self, interface: &str) -> Result<(), FirewallError> {
        self.check_available()?;
        info!(
            "Redirecting TCP to :{} and DNS to :{} on {}",
            self.ports.trans_port, self.ports.dns_port, interface
        );

        let mut installed = Vec::with_capacity(RedirectRule::ALL.len());
        for rule in RedirectRule::ALL {
            if let Err(source) = self.apply(rule, RuleAction::Append, interface) {
                for done in installed.into_iter().rev() {
                    if let Err(e) = self.apply(done, RuleAction::Delete, interface) {
                        warn!("Could not undo {} NAT rule on {}: {}", done.label(), interface, e);
                    }
                }
                return Err(FirewallError::Install {
                    rule: rule.label(),
                    source,
                });
            }
            installed.push(rule);
        }
        Ok(())
    }

    fn remove_redirect(&mut self, interface: &str) -> Result<(), FirewallError> {
        self.check_available()?;
        info!("Removing NAT redirection on {}", interface);

        let mut failed = Vec::new();
        for rule in RedirectRule::ALL {
            if let Err(e) = self.apply(rule, RuleAction::Delete, interface) {
                warn!("Could not delete {} NAT rule on {}: {}", rule.label(), interface, e);
                failed.push(format!("{} ({})", rule.label(), e));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(FirewallError::Remove { failed })
        }
    }
}

/// Parse `iptables -t nat -S PREROUTING` output into rules.
///
/// The chain policy line (`-P PREROUTING ACCEPT`) is skipped.
pub fn parse_prerouting_rules(output: &str) -> Vec<PreroutingRule> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            if tokens.next()? != "-A" || tokens.next()? != "PREROUTING" {
                return None;
            }
            let spec: Vec<String> = tokens.map(str::to_string).collect();
            let interface = spec
                .iter()
                .position(|t| t == "-i")
                .and_then(|i| spec.get(i + 1))
                .cloned();
            Some(PreroutingRule { interface, spec })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = "\
-P PREROUTING ACCEPT
-A PREROUTING -i vethTor4242 -p tcp -m tcp --tcp-flags FIN,SYN,RST,ACK SYN -j REDIRECT --to-ports 9040
-A PREROUTING -i vethTor4242 -p udp -m udp --dport 53 -j REDIRECT --to-ports 9053
-A PREROUTING -m addrtype --dst-type LOCAL -j DOCKER
";

    #[test]
    fn test_parse_prerouting_rules() {
        let rules = parse_prerouting_rules(RULES);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].interface.as_deref(), Some("vethTor4242"));
        assert_eq!(rules[1].interface.as_deref(), Some("vethTor4242"));
        assert_eq!(rules[2].interface, None);
    }

    #[test]
    fn test_delete_args_from_listing() {
        let rules = parse_prerouting_rules(RULES);
        assert_eq!(
            rules[1].delete_args().join(" "),
            "-t nat -D PREROUTING -i vethTor4242 -p udp -m udp --dport 53 -j REDIRECT --to-ports 9053"
        );
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let mut iptables = Iptables::new("/definitely/not/iptables", RedirectPorts::default());
        // Only meaningful when iptables is not installed either.
        if crate::command::locate_binary("iptables", &[]).is_some() {
            return;
        }
        let err = iptables.check_available().unwrap_err();
        assert!(matches!(err, FirewallError::NotFound { .. }));
        assert!(err.to_string().contains("/definitely/not/iptables"));
    }

    #[test]
    fn test_prefers_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("iptables");
        std::fs::write(&fake, "").unwrap();

        let mut iptables = Iptables::new(&fake, RedirectPorts::default());
        iptables.check_available().unwrap();
        assert_eq!(iptables.binary().unwrap(), fake.as_path());
    }

    /// A stand-in iptables that logs its arguments and fails on request.
    fn fake_iptables(dir: &Path, fail_on: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.join("calls.log");
        let script = dir.join("iptables");
        let body = format!(
            "#!/bin/sh\necho \"$*\" >> {}\ncase \"$*\" in *\"{}\"*) echo refused >&2; exit 1;; esac\nexit 0\n",
            log.display(),
            fail_on
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_install_failure_undoes_tcp_rule() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_iptables(dir.path(), "-A PREROUTING -i v0 -p udp");
        let mut iptables = Iptables::new(&script, RedirectPorts::default());

        let err = iptables.install_redirect("v0").unwrap_err();
        assert!(matches!(err, FirewallError::Install { rule: "DNS", .. }));

        let calls = calls(dir.path());
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("-A PREROUTING -i v0 -p tcp"));
        assert!(calls[2].contains("-D PREROUTING -i v0 -p tcp"));
    }

    #[test]
    fn test_remove_attempts_both_rules() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_iptables(dir.path(), "-D PREROUTING -i v0 -p tcp");
        let mut iptables = Iptables::new(&script, RedirectPorts::default());

        let err = iptables.remove_redirect("v0").unwrap_err();
        match err {
            FirewallError::Remove { failed } => assert_eq!(failed.len(), 1),
            other => panic!("unexpected error: {other}"),
        }
        let calls = calls(dir.path());
        assert_eq!(calls.len(), 2);
        assert!(calls[1].contains("-p udp --dport 53"));
    }
}
