//! A single authenticated control-port session.

use super::conf::{ConfEntry, quote, unquote};
use super::error::TorError;
use super::reply::{Reply, ReplyParser};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

/// What `PROTOCOLINFO` told us about authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Offered methods, upper-cased (`NULL`, `HASHEDPASSWORD`, `COOKIE`, ...).
    pub methods: Vec<String>,
    /// Cookie file path, when cookie authentication is offered.
    pub cookie_file: Option<PathBuf>,
}

impl ProtocolInfo {
    /// Parse the data lines of a `PROTOCOLINFO` reply.
    pub fn from_reply(reply: &Reply) -> Self {
        let mut info = Self::default();
        for line in reply.lines() {
            let Some(rest) = line.strip_prefix("AUTH ") else {
                continue;
            };
            for field in split_fields(rest) {
                if let Some(methods) = field.strip_prefix("METHODS=") {
                    info.methods = methods
                        .split(',')
                        .map(|m| m.trim().to_ascii_uppercase())
                        .filter(|m| !m.is_empty())
                        .collect();
                } else if let Some(path) = field.strip_prefix("COOKIEFILE=") {
                    info.cookie_file = Some(PathBuf::from(unquote(path)));
                }
            }
        }
        info
    }

    /// Whether `method` was offered.
    pub fn offers(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}

/// Split on spaces that are not inside a quoted string.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                if i > start {
                    fields.push(&line[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < line.len() {
        fields.push(&line[start..]);
    }
    fields
}

/// Credentials for `AUTHENTICATE`.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Control password; empty means none.
    pub password: String,
    /// Cookie file overriding the one Tor advertises.
    pub cookie_file: Option<PathBuf>,
    /// Fall back to the cookie file named in `PROTOCOLINFO`.
    ///
    /// That path comes from whatever answers on the control port, so an
    /// elevated process must not read it.
    pub accept_advertised_cookie: bool,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            password: String::new(),
            cookie_file: None,
            accept_advertised_cookie: true,
        }
    }
}

/// Line-oriented request/response session.
///
/// Generic over the transport so tests can run it over an in-memory pipe.
#[derive(Debug)]
pub struct ControlConnection<S = TcpStream> {
    stream: BufReader<S>,
}

impl ControlConnection<TcpStream> {
    /// Dial `host:port`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, TorError> {
        let addr = format!("{host}:{port}");
        debug!("Connecting to Tor control port at {}", addr);
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TorError::Connect { addr, source })?;
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ControlConnection<S> {
    /// Wrap an established transport.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TorError> {
        if line.starts_with("AUTHENTICATE ") {
            trace!("C: AUTHENTICATE <redacted>");
        } else {
            trace!("C: {}", line);
        }
        let writer = self.stream.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\r\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply, TorError> {
        let mut parser = ReplyParser::new();
        let mut buf = String::new();
        loop {
            buf.clear();
            if self.stream.read_line(&mut buf).await? == 0 {
                return Err(TorError::Closed);
            }
            let line = buf.trim_end_matches(['\r', '\n']);
            trace!("S: {}", line);
            if let Some(reply) = parser.push(line)? {
                return Ok(reply);
            }
        }
    }

    /// Send one request and wait for its reply. Non-2xx replies are errors.
    pub async fn request(&mut self, line: &str) -> Result<Reply, TorError> {
        self.send_line(line).await?;
        self.read_reply().await?.into_result()
    }

    /// Ask which authentication methods are available.
    pub async fn protocol_info(&mut self) -> Result<ProtocolInfo, TorError> {
        let reply = self.request("PROTOCOLINFO 1").await?;
        Ok(ProtocolInfo::from_reply(&reply))
    }

    /// Authenticate the session.
    ///
    /// A non-empty password always wins. Otherwise `NULL` is used when
    /// offered, then `COOKIE`.
    pub async fn authenticate(&mut self, creds: &Credentials) -> Result<(), TorError> {
        let info = self.protocol_info().await?;
        debug!("Tor offers authentication methods {:?}", info.methods);

        let request = if !creds.password.is_empty() {
            format!("AUTHENTICATE {}", quote(&creds.password))
        } else if info.offers("NULL") {
            "AUTHENTICATE".to_string()
        } else if info.offers("COOKIE") {
            format!("AUTHENTICATE {}", read_cookie(&cookie_path(creds, info.cookie_file)?)?)
        } else {
            return Err(TorError::Auth(format!(
                "no usable method (offered: {}); set a control password",
                info.methods.join(",")
            )));
        };

        self.request(&request).await.map_err(|e| match e {
            TorError::Status { code, message } => TorError::Auth(format!("{code} {message}")),
            other => other,
        })?;
        info!("Authenticated to Tor control port");
        Ok(())
    }

    /// Fetch every value of a multi-valued option.
    pub async fn get_multi_value(&mut self, keyword: &str) -> Result<ConfEntry, TorError> {
        let reply = self.request(&format!("GETCONF {keyword}")).await?;
        Ok(ConfEntry::from_reply_lines(keyword, reply.lines()))
    }

    /// Replace the full value set of an option.
    pub async fn set_multi_value(&mut self, entry: &ConfEntry) -> Result<(), TorError> {
        self.request(&format!("SETCONF {entry}")).await?;
        Ok(())
    }

    /// Add `value` to `keyword` unless already present.
    ///
    /// Returns whether a `SETCONF` was sent.
    pub async fn append_conf_value(&mut self, keyword: &str, value: &str) -> Result<bool, TorError> {
        let mut entry = self.get_multi_value(keyword).await?;
        if !entry.insert(value) {
            debug!("{}={} already configured", keyword, value);
            return Ok(false);
        }
        self.set_multi_value(&entry).await?;
        Ok(true)
    }

    /// Remove `value` from `keyword` if present.
    ///
    /// Returns whether a `SETCONF` was sent.
    pub async fn remove_conf_value(&mut self, keyword: &str, value: &str) -> Result<bool, TorError> {
        let mut entry = self.get_multi_value(keyword).await?;
        if !entry.remove(value) {
            debug!("{}={} not configured, nothing to remove", keyword, value);
            return Ok(false);
        }
        self.set_multi_value(&entry).await?;
        Ok(true)
    }
}

fn cookie_path(creds: &Credentials, advertised: Option<PathBuf>) -> Result<PathBuf, TorError> {
    if let Some(path) = &creds.cookie_file {
        return Ok(path.clone());
    }
    match advertised {
        Some(path) if creds.accept_advertised_cookie => Ok(path),
        Some(path) => Err(TorError::Auth(format!(
            "refusing to read advertised cookie file {path:?}; configure control.cookie_file"
        ))),
        None => Err(TorError::Auth("cookie auth offered without a cookie file".into())),
    }
}

fn read_cookie(path: &Path) -> Result<String, TorError> {
    let bytes = std::fs::read(path).map_err(|source| TorError::CookieRead {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
