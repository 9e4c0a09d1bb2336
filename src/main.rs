//! tor-netns: run a command with its network traffic forced through Tor
//!
//! This is the main entry point for the tor-netns binary. It captures the
//! process identity, parses the CLI, loads configuration and hands over to
//! the orchestrator (or to the stale-resource collector for `cleanup`).
//!
//! # I/O Architecture
//!
//! Logs go to stderr. The wrapped command inherits stdin, stdout and
//! stderr untouched, so the default log level is `warn` to stay out of its
//! way.

use anyhow::{Context, Result};
use clap::Parser;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitCode, ExitStatus};
use tor_netns::{
    cleanup,
    cli::{Cli, Commands},
    config::{Config, ConfigLoader},
    firewall::Iptables,
    netns::system::locate_ip,
    orchestrator,
    privilege::Identity,
};
use tracing::{debug, error, info, warn};

fn main() -> ExitCode {
    // Captured before anything else can touch the process identity.
    let identity = match Identity::capture() {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(&cli, identity) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, identity: Identity) -> Result<ExitCode> {
    let config = ConfigLoader::new()
        .elevated(identity.is_elevated())
        .load(cli)
        .context("Failed to load configuration")?;
    debug!(
        "Control port {}:{}, veth prefix {}, overlap policy {:?}",
        config.control.host,
        config.control.port,
        config.network.veth_prefix,
        config.network.overlap_policy
    );

    if let Some(Commands::Cleanup { dry_run }) = cli.command {
        return run_cleanup(&config, dry_run);
    }

    let command = cli
        .command_line()
        .context("No command given; usage: tor-netns [OPTIONS] COMMAND [ARGS]...")?;

    if !identity.effective_uid.is_root() {
        warn!(
            "Running without root (effective uid {}); namespace setup will probably fail",
            identity.effective_uid
        );
    }

    let outcome = orchestrator::run_session(&config, identity, command)?;

    match outcome.status {
        Some(status) => info!("Command exited: {}", status),
        None => info!("Command did not run to completion"),
    }

    Ok(exit_code(&config, outcome.status))
}

fn run_cleanup(config: &Config, dry_run: bool) -> Result<ExitCode> {
    let ip = locate_ip().context("Cannot clean up links")?;
    let mut iptables = Iptables::new(&config.firewall.iptables_path, config.redirect);
    let found = cleanup::collect_stale(&ip, &mut iptables, &config.network.veth_prefix, dry_run);

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for link in &found.links {
        println!("{verb} link {link}");
    }
    for rule in &found.rules {
        println!("{verb} rule -A PREROUTING {}", rule.spec.join(" "));
    }
    if found.is_empty() {
        println!("Nothing to clean up");
    }
    Ok(ExitCode::SUCCESS)
}

/// The process exit code for a finished session.
///
/// The command's own status is only passed through when configured to.
fn exit_code(config: &Config, status: Option<ExitStatus>) -> ExitCode {
    if !config.exec.propagate_exit_code {
        return ExitCode::SUCCESS;
    }
    let Some(status) = status else {
        return ExitCode::FAILURE;
    };
    let code = status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1);
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, or warnings and errors only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
