//! Listen/unlisten on top of a control session.

use super::connection::{ControlConnection, Credentials};
use super::error::TorError;
use super::ProxyControl;
use crate::firewall::RedirectPorts;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

/// Keyword of Tor's DNS listener.
pub const DNS_PORT: &str = "DNSPort";

/// Keyword of Tor's transparent TCP listener.
pub const TRANS_PORT: &str = "TransPort";

/// Keyword of the DNS listener's bind address.
pub const DNS_LISTEN_ADDRESS: &str = "DNSListenAddress";

/// Where and how to reach the control port.
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Control host.
    pub host: String,
    /// Control port.
    pub port: u16,
    /// Authentication material.
    pub credentials: Credentials,
}

/// The `(keyword, value)` directives a listener needs on `address`.
pub fn listen_directives(address: Ipv4Addr, ports: &RedirectPorts) -> [(&'static str, String); 3] {
    [
        (DNS_PORT, ports.dns_port.to_string()),
        (TRANS_PORT, format!("{}:{}", address, ports.trans_port)),
        (DNS_LISTEN_ADDRESS, address.to_string()),
    ]
}

/// Make Tor listen on `address`. Already present directives are left alone.
pub async fn listen<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut ControlConnection<S>,
    address: Ipv4Addr,
    ports: &RedirectPorts,
) -> Result<(), TorError> {
    info!("Asking Tor to listen on {}", address);
    for (keyword, value) in listen_directives(address, ports) {
        if conn.append_conf_value(keyword, &value).await? {
            debug!("Set {}={}", keyword, value);
        }
    }
    Ok(())
}

/// Remove the address-scoped directives for `address`.
///
/// `DNSPort` is shared and stays configured.
pub async fn unlisten<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut ControlConnection<S>,
    address: Ipv4Addr,
    ports: &RedirectPorts,
) -> Result<(), TorError> {
    info!("Asking Tor to stop listening on {}", address);
    for (keyword, value) in listen_directives(address, ports) {
        if keyword == DNS_PORT {
            continue;
        }
        if conn.remove_conf_value(keyword, &value).await? {
            debug!("Removed {}={}", keyword, value);
        }
    }
    Ok(())
}

async fn open_session(settings: &ControlSettings) -> Result<ControlConnection, TorError> {
    let mut conn = ControlConnection::connect(&settings.host, settings.port).await?;
    conn.authenticate(&settings.credentials).await?;
    Ok(conn)
}

/// Blocking [`ProxyControl`] over a shared current-thread runtime.
///
/// The session opened by [`ProxyControl::connect`] is kept and reused.
pub struct TorController {
    settings: ControlSettings,
    ports: RedirectPorts,
    runtime: Arc<Runtime>,
    conn: Option<ControlConnection>,
}

impl TorController {
    /// Create a controller. Nothing is dialled until `connect`.
    pub fn new(settings: ControlSettings, ports: RedirectPorts, runtime: Arc<Runtime>) -> Self {
        Self {
            settings,
            ports,
            runtime,
            conn: None,
        }
    }

    /// Whether a session is currently held.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }
}

impl ProxyControl for TorController {
    fn connect(&mut self) -> Result<(), TorError> {
        let conn = self.runtime.block_on(open_session(&self.settings))?;
        self.conn = Some(conn);
        Ok(())
    }

    fn listen(&mut self, address: Ipv4Addr) -> Result<(), TorError> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            if self.conn.is_none() {
                self.conn = Some(open_session(&self.settings).await?);
            }
            let Some(conn) = self.conn.as_mut() else {
                return Err(TorError::Closed);
            };
            listen(conn, address, &self.ports).await
        })
    }

    fn unlisten(&mut self, address: Ipv4Addr) -> Result<(), TorError> {
        let runtime = Arc::clone(&self.runtime);
        runtime.block_on(async {
            if let Some(conn) = self.conn.as_mut() {
                match unlisten(conn, address, &self.ports).await {
                    Err(e) if e.is_connection_lost() => {
                        warn!("Control session lost ({}), reconnecting once", e);
                        self.conn = None;
                    }
                    other => return other,
                }
            }
            let mut conn = open_session(&self.settings).await?;
            let result = unlisten(&mut conn, address, &self.ports).await;
            self.conn = Some(conn);
            result
        })
    }
}
