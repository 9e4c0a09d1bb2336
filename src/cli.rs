//! Command-line interface definitions for tor-netns.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::netns::OverlapPolicy;

/// Run a command with all of its network traffic routed through Tor.
///
/// tor-netns creates a fresh network namespace, links it to the host with a
/// veth pair, redirects its TCP and DNS traffic into Tor's TransPort and
/// DNSPort, and runs the command inside it with your own (unprivileged)
/// identity. Everything is removed again when the command exits.
#[derive(Parser, Debug)]
#[command(name = "tor-netns")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to run (or omit to run a command through Tor).
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Program to run inside the isolated namespace, followed by its arguments.
    ///
    /// Everything from the program name on is passed through unchanged.
    /// Required unless using a subcommand.
    #[arg(
        value_name = "COMMAND",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub exec: Vec<String>,

    /// Tor control host.
    #[arg(short = 'H', long = "control-host", value_name = "HOST")]
    pub control_host: Option<String>,

    /// Tor control port.
    #[arg(short = 'p', long = "control-port", value_name = "PORT")]
    pub control_port: Option<u16>,

    /// Tor control password.
    #[arg(
        short = 's',
        long = "control-pw",
        value_name = "SECRET",
        env = "TOR_NETNS_CONTROL_PW",
        hide_env_values = true
    )]
    pub control_pw: Option<String>,

    /// Cookie file for cookie authentication (overrides the one Tor reports).
    #[arg(long = "cookie-file", value_name = "PATH")]
    pub cookie_file: Option<PathBuf>,

    /// Path to additional config file.
    ///
    /// Merged on top of the system and user configs; only CLI flags take
    /// precedence over it.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Require the link subnet to be disjoint from every host network (default).
    #[arg(long = "strict-subnet-check", conflicts_with = "legacy_subnet_check")]
    pub strict_subnet_check: bool,

    /// Accept a subnet as soon as one host network does not overlap it.
    #[arg(long = "legacy-subnet-check")]
    pub legacy_subnet_check: bool,

    /// Exit with the command's exit status instead of 0.
    #[arg(long = "propagate-exit-code")]
    pub propagate_exit_code: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level (includes control-port traffic)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Subcommands for tor-netns.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove links and NAT rules left behind by sessions that died.
    Cleanup {
        /// Only report what would be removed.
        #[arg(long = "dry-run")]
        dry_run: bool,
    },
}

impl Cli {
    /// The full command line to run, if one was given.
    pub fn command_line(&self) -> Option<&[String]> {
        (!self.exec.is_empty()).then_some(self.exec.as_slice())
    }

    /// Overlap policy selected on the command line, if any.
    pub fn overlap_policy(&self) -> Option<OverlapPolicy> {
        if self.legacy_subnet_check {
            Some(OverlapPolicy::FirstMismatch)
        } else if self.strict_subnet_check {
            Some(OverlapPolicy::Strict)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_basic() {
        let cli = Cli::parse_from(["tor-netns", "curl"]);
        assert_eq!(cli.command_line().unwrap(), ["curl"]);
        assert_eq!(cli.verbose, 0);
        assert!(cli.command.is_none());
        assert!(cli.control_port.is_none());
    }

    #[test]
    fn test_cli_parse_with_args() {
        let cli = Cli::parse_from(["tor-netns", "curl", "-s", "https://check.torproject.org"]);
        assert_eq!(
            cli.command_line().unwrap(),
            vec!["curl", "-s", "https://check.torproject.org"]
        );
        // -s after the program belongs to the program, not to us.
        if std::env::var_os("TOR_NETNS_CONTROL_PW").is_none() {
            assert!(cli.control_pw.is_none());
        }
    }

    #[test]
    fn test_cli_parse_with_options() {
        let cli = Cli::parse_from([
            "tor-netns",
            "-H",
            "10.1.1.1",
            "-p",
            "9151",
            "-s",
            "hunter2",
            "--legacy-subnet-check",
            "--propagate-exit-code",
            "-vv",
            "bash",
            "-l",
        ]);

        assert_eq!(cli.control_host.as_deref(), Some("10.1.1.1"));
        assert_eq!(cli.control_port, Some(9151));
        assert_eq!(cli.control_pw.as_deref(), Some("hunter2"));
        assert_eq!(cli.overlap_policy(), Some(OverlapPolicy::FirstMismatch));
        assert!(cli.propagate_exit_code);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.command_line().unwrap(), vec!["bash", "-l"]);
    }

    #[test]
    fn test_subnet_check_flags_conflict() {
        let result = Cli::try_parse_from([
            "tor-netns",
            "--strict-subnet-check",
            "--legacy-subnet-check",
            "true",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cleanup_command() {
        let cli = Cli::parse_from(["tor-netns", "cleanup", "--dry-run"]);
        assert!(cli.command_line().is_none());
        match cli.command {
            Some(Commands::Cleanup { dry_run }) => assert!(dry_run),
            _ => panic!("Expected Cleanup command"),
        }
    }
}
