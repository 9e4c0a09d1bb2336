//! Tor control-port client.
//!
//! Only the parts of the control protocol needed for transparent proxying
//! are implemented: `PROTOCOLINFO`/`AUTHENTICATE` to open a session, and
//! `GETCONF`/`SETCONF` on three multi-valued options.
//!
//! ```text
//! listen(10.x.y.1)                 unlisten(10.x.y.1)
//!   DNSPort=9053          (add)      DNSPort               (kept)
//!   TransPort=10.x.y.1:9040 (add)    TransPort=10.x.y.1:9040 (remove)
//!   DNSListenAddress=10.x.y.1 (add)  DNSListenAddress=10.x.y.1 (remove)
//! ```

pub mod conf;
pub mod connection;
pub mod controller;
pub mod error;
pub mod reply;

pub use conf::ConfEntry;
pub use connection::{ControlConnection, Credentials, ProtocolInfo};
pub use controller::{ControlSettings, TorController};
pub use error::TorError;
pub use reply::{Reply, ReplyParser};

use std::net::Ipv4Addr;

/// Default control host.
pub const DEFAULT_CONTROL_HOST: &str = "127.0.0.1";

/// Default control port.
pub const DEFAULT_CONTROL_PORT: u16 = 9051;

/// Proxy operations the orchestrator needs.
pub trait ProxyControl {
    /// Open and authenticate a session.
    fn connect(&mut self) -> Result<(), TorError>;

    /// Start listening on `address`.
    fn listen(&mut self, address: Ipv4Addr) -> Result<(), TorError>;

    /// Stop listening on `address`.
    fn unlisten(&mut self, address: Ipv4Addr) -> Result<(), TorError>;
}
