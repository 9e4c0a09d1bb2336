//! Control-port client tests against a scripted Tor stand-in.
//!
//! The stand-in keeps a small option table, answers `GETCONF` from it and
//! applies `SETCONF` to it, so the tests can check both the requests sent
//! and the configuration Tor ends up with. It can also drop the session it
//! is serving, or go away entirely.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use tor_netns::firewall::RedirectPorts;
use tor_netns::tor::controller::{listen, unlisten};
use tor_netns::tor::{
    ConfEntry, ControlConnection, ControlSettings, Credentials, ProxyControl, TorController, TorError,
};

const HOST_ADDR: Ipv4Addr = Ipv4Addr::new(10, 44, 3, 1);

#[derive(Default)]
struct TorState {
    options: HashMap<String, Vec<String>>,
    /// Raw replies used instead of the table, keyed by request, consumed once.
    canned: HashMap<String, String>,
    requests: Vec<String>,
    /// The connection being served, kept so it can be cut.
    current: Option<TcpStream>,
    /// Refuse further sessions.
    stopped: bool,
}

/// A Tor control port that serves connections one after another.
struct MockTor {
    port: u16,
    state: Arc<Mutex<TorState>>,
}

impl MockTor {
    fn start(password: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(TorState::default()));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                if shared.lock().unwrap().stopped {
                    // Dropping the listener makes later connects fail outright.
                    break;
                }
                serve(stream, &shared, password);
            }
        });
        Self { port, state }
    }

    fn set_option(&self, keyword: &str, values: &[&str]) {
        self.state.lock().unwrap().options.insert(
            keyword.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
    }

    fn can(&self, request: &str, reply: &str) {
        self.state
            .lock()
            .unwrap()
            .canned
            .insert(request.to_string(), reply.to_string());
    }

    /// Close the session being served, as a restarting Tor would.
    fn hang_up(&self) {
        if let Some(stream) = self.state.lock().unwrap().current.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Hang up and accept no further sessions.
    fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.hang_up();
    }

    fn auth_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.starts_with("AUTHENTICATE"))
            .count()
    }

    fn option(&self, keyword: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .options
            .get(keyword)
            .cloned()
            .unwrap_or_default()
    }

    fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }

    fn setconfs(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.starts_with("SETCONF"))
            .collect()
    }

    fn settings(&self, password: &str) -> ControlSettings {
        ControlSettings {
            host: "127.0.0.1".to_string(),
            port: self.port,
            credentials: Credentials {
                password: password.to_string(),
                ..Credentials::default()
            },
        }
    }
}

fn serve(stream: TcpStream, state: &Mutex<TorState>, password: Option<&str>) {
    let mut writer = stream.try_clone().unwrap();
    state.lock().unwrap().current = Some(stream.try_clone().unwrap());
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let reply = respond(&line, state, password);
        if writer.write_all(reply.as_bytes()).is_err() {
            break;
        }
    }
}

fn respond(line: &str, state: &Mutex<TorState>, password: Option<&str>) -> String {
    let mut state = state.lock().unwrap();
    state.requests.push(line.to_string());
    if let Some(reply) = state.canned.remove(line) {
        return reply;
    }

    let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
    match verb {
        "PROTOCOLINFO" => {
            let methods = if password.is_some() { "HASHEDPASSWORD" } else { "NULL" };
            format!(
                "250-PROTOCOLINFO 1\r\n250-AUTH METHODS={methods}\r\n250-VERSION Tor=\"0.4.8.12\"\r\n250 OK\r\n"
            )
        }
        "AUTHENTICATE" => match password {
            Some(expected) if rest != format!("\"{expected}\"") => {
                "515 Authentication failed: Password did not match\r\n".to_string()
            }
            _ => "250 OK\r\n".to_string(),
        },
        "GETCONF" => {
            let values = state.options.get(rest).cloned().unwrap_or_default();
            if values.is_empty() {
                return format!("250 {rest}\r\n");
            }
            let mut out = String::new();
            for (i, value) in values.iter().enumerate() {
                let sep = if i + 1 == values.len() { ' ' } else { '-' };
                out.push_str(&format!("250{sep}{rest}={value}\r\n"));
            }
            out
        }
        "SETCONF" => {
            let mut updates: HashMap<String, Vec<String>> = HashMap::new();
            for token in setconf_tokens(rest) {
                match token.split_once('=') {
                    Some((key, value)) => updates
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string()),
                    None => {
                        updates.entry(token.to_string()).or_default();
                    }
                }
            }
            state.options.extend(updates);
            "250 OK\r\n".to_string()
        }
        _ => format!("510 Unrecognized command \"{verb}\"\r\n"),
    }
}

/// Split `SETCONF` arguments on spaces outside quoted values. Values are
/// stored as sent, so `GETCONF` echoes them back quoted like Tor does.
fn setconf_tokens(rest: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ' ' if !quoted => {
                if i > start {
                    tokens.push(&rest[start..i]);
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < rest.len() {
        tokens.push(&rest[start..]);
    }
    tokens
}

async fn session(tor: &MockTor) -> ControlConnection {
    let mut conn = ControlConnection::connect("127.0.0.1", tor.port).await.unwrap();
    conn.authenticate(&Credentials::default()).await.unwrap();
    conn
}

#[tokio::test]
async fn test_listen_sets_dnsport_from_block_reply() {
    let tor = MockTor::start(None);
    tor.can("GETCONF DNSPort", "250+DNSPort\r\n9053\r\n250 OK\r\n");

    let mut conn = session(&tor).await;
    listen(&mut conn, HOST_ADDR, &RedirectPorts::default()).await.unwrap();

    assert!(tor.requests().contains(&"SETCONF DNSPort=9053".to_string()));
}

#[tokio::test]
async fn test_listen_configures_all_directives() {
    let tor = MockTor::start(None);
    tor.set_option("TransPort", &["127.0.0.1:9040"]);

    let mut conn = session(&tor).await;
    listen(&mut conn, HOST_ADDR, &RedirectPorts::default()).await.unwrap();

    assert_eq!(tor.option("DNSPort"), vec!["9053"]);
    assert_eq!(tor.option("TransPort"), vec!["127.0.0.1:9040", "10.44.3.1:9040"]);
    assert_eq!(tor.option("DNSListenAddress"), vec!["10.44.3.1"]);
    assert!(
        tor.requests()
            .contains(&"SETCONF TransPort=127.0.0.1:9040 TransPort=10.44.3.1:9040".to_string())
    );
}

#[tokio::test]
async fn test_listen_twice_sends_no_second_setconf() {
    let tor = MockTor::start(None);
    let mut conn = session(&tor).await;
    let ports = RedirectPorts::default();

    listen(&mut conn, HOST_ADDR, &ports).await.unwrap();
    let first = tor.setconfs().len();
    assert_eq!(first, 3);

    listen(&mut conn, HOST_ADDR, &ports).await.unwrap();
    assert_eq!(tor.setconfs().len(), first);
    assert_eq!(tor.option("TransPort"), vec!["10.44.3.1:9040"]);
}

#[tokio::test]
async fn test_unlisten_keeps_dnsport_and_other_listeners() {
    let tor = MockTor::start(None);
    tor.set_option("TransPort", &["127.0.0.1:9040"]);
    let mut conn = session(&tor).await;
    let ports = RedirectPorts::default();

    listen(&mut conn, HOST_ADDR, &ports).await.unwrap();
    unlisten(&mut conn, HOST_ADDR, &ports).await.unwrap();

    assert_eq!(tor.option("DNSPort"), vec!["9053"]);
    assert_eq!(tor.option("TransPort"), vec!["127.0.0.1:9040"]);
    assert!(tor.option("DNSListenAddress").is_empty());
    // The last value is cleared with the bare keyword.
    assert!(tor.requests().contains(&"SETCONF DNSListenAddress".to_string()));
}

#[tokio::test]
async fn test_unlisten_without_listen_is_noop() {
    let tor = MockTor::start(None);
    tor.set_option("TransPort", &["127.0.0.1:9040"]);
    let mut conn = session(&tor).await;

    unlisten(&mut conn, HOST_ADDR, &RedirectPorts::default()).await.unwrap();

    assert!(tor.setconfs().is_empty());
    assert_eq!(tor.option("TransPort"), vec!["127.0.0.1:9040"]);
}

#[tokio::test]
async fn test_custom_ports() {
    let tor = MockTor::start(None);
    let mut conn = session(&tor).await;
    let ports = RedirectPorts {
        trans_port: 19040,
        dns_port: 19053,
    };

    listen(&mut conn, HOST_ADDR, &ports).await.unwrap();

    assert_eq!(tor.option("DNSPort"), vec!["19053"]);
    assert_eq!(tor.option("TransPort"), vec!["10.44.3.1:19040"]);
}

#[tokio::test]
async fn test_multi_value_round_trip_with_quoted_values() {
    let tor = MockTor::start(None);
    let mut conn = session(&tor).await;

    let mut entry = ConfEntry::new("TransPort");
    for value in [
        "127.0.0.1:9040",
        "10.44.3.1:9040 IsolateDestAddr IsolateDestPort",
        r#"unix:"/run/tor/trans sock""#,
    ] {
        assert!(entry.insert(value));
    }
    conn.set_multi_value(&entry).await.unwrap();
    assert_eq!(tor.option("TransPort").len(), 3);

    let fetched = conn.get_multi_value("TransPort").await.unwrap();
    assert_eq!(fetched.keyword(), "TransPort");
    let mut sent = entry.values().to_vec();
    let mut got = fetched.values().to_vec();
    sent.sort();
    got.sort();
    assert_eq!(got, sent);
}

#[tokio::test]
async fn test_password_authentication() {
    let tor = MockTor::start(Some("s3cret"));

    let mut conn = ControlConnection::connect("127.0.0.1", tor.port).await.unwrap();
    let creds = Credentials {
        password: "s3cret".to_string(),
        ..Credentials::default()
    };
    conn.authenticate(&creds).await.unwrap();
    assert!(tor.requests().contains(&"AUTHENTICATE \"s3cret\"".to_string()));
    // The stand-in serves one connection at a time.
    drop(conn);

    let mut conn = ControlConnection::connect("127.0.0.1", tor.port).await.unwrap();
    let wrong = Credentials {
        password: "nope".to_string(),
        ..Credentials::default()
    };
    let err = conn.authenticate(&wrong).await.unwrap_err();
    assert!(matches!(err, TorError::Auth(_)));
}

#[tokio::test]
async fn test_connect_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let err = ControlConnection::connect("127.0.0.1", port).await.unwrap_err();
    assert!(matches!(err, TorError::Connect { .. }));
}

fn controller(tor: &MockTor) -> TorController {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    TorController::new(tor.settings(""), RedirectPorts::default(), Arc::new(runtime))
}

#[test]
fn test_controller_reuses_preflight_session() {
    let tor = MockTor::start(None);
    let mut proxy = controller(&tor);
    assert!(!proxy.is_connected());

    proxy.connect().unwrap();
    assert!(proxy.is_connected());
    proxy.listen(HOST_ADDR).unwrap();
    proxy.unlisten(HOST_ADDR).unwrap();

    assert_eq!(tor.auth_count(), 1);
    assert!(tor.option("TransPort").is_empty());
    assert_eq!(tor.option("DNSPort"), vec!["9053"]);
}

#[test]
fn test_controller_listen_without_connect() {
    let tor = MockTor::start(None);
    let mut proxy = controller(&tor);

    proxy.listen(HOST_ADDR).unwrap();
    assert!(proxy.is_connected());
    assert_eq!(tor.option("DNSListenAddress"), vec!["10.44.3.1"]);
}

#[test]
fn test_controller_rejected_setconf_is_error() {
    let tor = MockTor::start(None);
    tor.can(
        "SETCONF DNSPort=9053",
        "553 Unable to set option: Failed to bind one of the listener ports.\r\n",
    );
    let mut proxy = controller(&tor);

    let err = proxy.listen(HOST_ADDR).unwrap_err();
    assert!(matches!(err, TorError::Status { code: 553, .. }));
}

#[test]
fn test_controller_unlisten_reconnects_after_lost_session() {
    let tor = MockTor::start(None);
    tor.set_option("TransPort", &["127.0.0.1:9040"]);
    let mut proxy = controller(&tor);

    proxy.listen(HOST_ADDR).unwrap();
    assert_eq!(tor.option("TransPort"), vec!["127.0.0.1:9040", "10.44.3.1:9040"]);

    tor.hang_up();
    proxy.unlisten(HOST_ADDR).unwrap();

    assert_eq!(tor.auth_count(), 2);
    assert!(proxy.is_connected());
    assert_eq!(tor.option("TransPort"), vec!["127.0.0.1:9040"]);
    assert!(tor.option("DNSListenAddress").is_empty());
    assert_eq!(tor.option("DNSPort"), vec!["9053"]);
}

#[test]
fn test_controller_unlisten_fails_when_tor_is_gone() {
    let tor = MockTor::start(None);
    let mut proxy = controller(&tor);
    proxy.listen(HOST_ADDR).unwrap();

    tor.stop();
    let err = proxy.unlisten(HOST_ADDR).unwrap_err();

    assert!(
        err.is_connection_lost() || matches!(err, TorError::Connect { .. }),
        "unexpected error: {err}"
    );
    assert!(!proxy.is_connected());
    assert_eq!(tor.option("TransPort"), vec!["10.44.3.1:9040"]);
}
