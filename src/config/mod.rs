//! Configuration system for tor-netns.
//!
//! This module provides TOML configuration loading with hierarchy merging.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/tor-netns/config.toml`
//! 3. User config: `~/.config/tor-netns/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! No configuration file is required; the defaults match a stock Tor
//! install with `ControlPort 9051`.
//!
//! # Merge Behavior
//!
//! Every value is a scalar. A key present in a later source overrides the
//! earlier value; a key that is absent leaves it alone.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{ConfigLoader, SYSTEM_CONFIG_PATH, validate};
pub use schema::{
    Config, ConfigLayer, ControlConfig, DEFAULT_VETH_PREFIX, ExecConfig, FirewallConfig,
    NetworkConfig,
};
