//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Built-in defaults
//! 2. System config: `/etc/tor-netns/config.toml`
//! 3. User config: `~/.config/tor-netns/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! When the process runs with elevated privileges (a setuid install), only
//! the built-in defaults and the system file are trusted. The user file is
//! skipped, and the flags that point at files or endpoints (`--config`,
//! `--cookie-file`, `--control-host`, `--control-port`) are refused, since
//! every one of them would let the caller steer what root reads or runs.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::error::ConfigError;
use super::schema::{Config, ConfigLayer};
use crate::cli::Cli;
use crate::netns::veth_names;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/tor-netns/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "tor-netns";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Largest pid the kernel hands out (`PID_MAX_LIMIT`).
const PID_MAX_LIMIT: u32 = 4_194_304;

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
    /// Restrict sources to the ones the invoking user cannot write.
    elevated: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
            elevated: false,
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
            elevated: false,
        }
    }

    /// Load as a process whose effective ids differ from the caller's.
    #[must_use]
    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// Load, merge and validate configuration from all sources.
    ///
    /// Missing system and user files are skipped. A missing `--config`
    /// file and invalid TOML anywhere are errors. When elevated, an
    /// untrusted source named on the command line is an error.
    pub fn load(&self, cli: &Cli) -> Result<Config, ConfigError> {
        if self.elevated {
            refuse_untrusted_flags(cli)?;
        }

        let mut config = Config::default();
        debug!("Loaded built-in default configuration");

        let mut layers = vec![&self.system_path];
        if self.elevated {
            warn!("Running with elevated privileges; ignoring {:?}", self.user_path);
            // Tor's advertised cookie path comes from whoever answers the port.
            config.control.accept_advertised_cookie = false;
        } else {
            layers.push(&self.user_path);
        }

        for path in layers {
            if let Some(layer) = self.load_file(path)? {
                config.merge(layer);
                debug!("Loaded config from {:?}", path);
            } else {
                debug!("No config found at {:?}", path);
            }
        }

        if let Some(ref cli_config_path) = cli.config {
            match self.load_file(cli_config_path)? {
                Some(layer) => {
                    config.merge(layer);
                    debug!("Loaded additional config from {:?}", cli_config_path);
                }
                None => {
                    // An explicitly named file has to exist.
                    return Err(ConfigError::Read {
                        path: cli_config_path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "no such config file",
                        ),
                    });
                }
            }
        }

        apply_cli(&mut config, cli);
        validate(&config)?;
        Ok(config)
    }

    /// Load one layer, returning None if the file doesn't exist.
    fn load_file(&self, path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let layer: ConfigLayer =
                    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(Some(layer))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }
}

fn refuse_untrusted_flags(cli: &Cli) -> Result<(), ConfigError> {
    let flags = [
        ("--config", cli.config.is_some()),
        ("--cookie-file", cli.cookie_file.is_some()),
        ("--control-host", cli.control_host.is_some()),
        ("--control-port", cli.control_port.is_some()),
    ];
    match flags.into_iter().find(|&(_, given)| given) {
        Some((flag, _)) => Err(ConfigError::Untrusted { flag }),
        None => Ok(()),
    }
}

fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(ref host) = cli.control_host {
        config.control.host = host.clone();
    }
    if let Some(port) = cli.control_port {
        config.control.port = port;
    }
    if let Some(ref password) = cli.control_pw {
        config.control.password = password.clone();
    }
    if let Some(ref cookie_file) = cli.cookie_file {
        config.control.cookie_file = Some(cookie_file.clone());
    }
    if let Some(policy) = cli.overlap_policy() {
        config.network.overlap_policy = policy;
    }
    if cli.propagate_exit_code {
        config.exec.propagate_exit_code = true;
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Check values the rest of the crate relies on.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let prefix = &config.network.veth_prefix;
    if prefix.is_empty() || prefix.contains(|c: char| c.is_whitespace() || c == '/' || c == ':') {
        return Err(invalid("network.veth_prefix", "must be a non-empty interface name prefix"));
    }
    veth_names(prefix, PID_MAX_LIMIT)
        .map_err(|e| invalid("network.veth_prefix", format!("too long for every pid: {e}")))?;

    if config.network.max_attempts == 0 {
        return Err(invalid("network.max_attempts", "must be at least 1"));
    }
    if config.control.port == 0 {
        return Err(invalid("control.port", "must be non-zero"));
    }
    if config.control.host.trim().is_empty() {
        return Err(invalid("control.host", "must not be empty"));
    }
    if config.redirect.trans_port == 0 {
        return Err(invalid("redirect.trans_port", "must be non-zero"));
    }
    if config.redirect.dns_port == 0 {
        return Err(invalid("redirect.dns_port", "must be non-zero"));
    }
    Ok(())
}
