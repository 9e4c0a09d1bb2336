//! tor-netns: run a command with its network traffic forced through Tor
//!
//! The command runs in its own network namespace. Its only way out is a
//! veth link to the host, where NAT rules hand every new TCP connection to
//! Tor's TransPort and every DNS query to Tor's DNSPort. Tor is told over
//! its control port to listen on the host end of that link.
//!
//! # Security Model
//!
//! The namespace has no route other than the veth link, and the link's
//! TCP and DNS traffic is redirected before routing. The command itself
//! runs with the invoking user's real identity; elevated privileges are
//! held only for setup and teardown. A failed identity change is fatal.
//!
//! # Architecture
//!
//! - **Netns**: subnet allocation, namespaces, veth links, addresses, routes
//! - **Firewall**: the two `nat PREROUTING` redirect rules
//! - **Tor**: control-port client (`GETCONF`/`SETCONF` on listen directives)
//! - **Privilege**: identity capture, drop and restore around the command
//! - **Orchestrator**: the setup/execute/teardown sequence and its ledger
//! - **Config**: hierarchical TOML configuration and CLI overrides
//! - **Cleanup**: removal of leftovers from sessions that crashed

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cleanup;
pub mod cli;
pub mod command;
pub mod config;
pub mod firewall;
pub mod netns;
pub mod orchestrator;
pub mod privilege;
pub mod tor;
