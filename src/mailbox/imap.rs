//! IMAP mailbox — raw IMAP4rev1 over rustls.
//!
//! Each call opens a short-lived session (blocking I/O, run under
//! `spawn_blocking`). Messages are fetched with `BODY.PEEK[]` so listing
//! never flags them; acknowledgement is an explicit `UID STORE +FLAGS (\Seen)`.
//! Message ids are `"<uidvalidity>:<uid>"`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Mailbox, RawMessage};
use crate::error::{ConfigError, MailboxError};

/// IMAP connection settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub folder: String,
    /// Bounds connect, read and write on the socket.
    pub timeout: Duration,
}

impl ImapConfig {
    /// Build config from environment variables.
    /// Returns `Ok(None)` if `INTAKE_IMAP_HOST` is not set (mailbox disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(host) = std::env::var("INTAKE_IMAP_HOST") else {
            return Ok(None);
        };

        let port: u16 = std::env::var("INTAKE_IMAP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);

        let username = std::env::var("INTAKE_IMAP_USERNAME")
            .map_err(|_| ConfigError::MissingEnvVar("INTAKE_IMAP_USERNAME".into()))?;
        let password = std::env::var("INTAKE_IMAP_PASSWORD")
            .map_err(|_| ConfigError::MissingEnvVar("INTAKE_IMAP_PASSWORD".into()))?;

        let folder = std::env::var("INTAKE_IMAP_FOLDER").unwrap_or_else(|_| "INBOX".into());

        let timeout_secs: u64 = std::env::var("INTAKE_MAILBOX_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Some(Self {
            host,
            port,
            username,
            password: SecretString::from(password),
            folder,
            timeout: Duration::from_secs(timeout_secs),
        }))
    }
}

/// Mailbox backed by an IMAP server.
pub struct ImapMailbox {
    config: ImapConfig,
    /// Acknowledgements are the only mutating call; one at a time.
    ack_lock: Mutex<()>,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self {
            config,
            ack_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn list_unseen(&self) -> Result<Vec<RawMessage>, MailboxError> {
        let cfg = self.config.clone();
        let messages = tokio::task::spawn_blocking(move || fetch_unseen(&cfg))
            .await
            .map_err(|e| MailboxError::Connect(format!("IMAP task failed: {e}")))??;
        debug!(count = messages.len(), host = %self.config.host, "Listed unseen messages");
        Ok(messages)
    }

    async fn mark_seen(&self, message_id: &str) -> Result<(), MailboxError> {
        let _guard = self.ack_lock.lock().await;
        let cfg = self.config.clone();
        let id = message_id.to_string();
        tokio::task::spawn_blocking(move || store_seen(&cfg, &id))
            .await
            .map_err(|e| MailboxError::Connect(format!("IMAP task failed: {e}")))?
    }
}

// ── Session ─────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literals returned by one command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

struct Session {
    stream: BufReader<TlsStream>,
    next_tag: u32,
}

impl Session {
    fn connect(config: &ImapConfig) -> Result<Self, MailboxError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| MailboxError::Connect(format!("cannot resolve {}", config.host)))?;
        let tcp = TcpStream::connect_timeout(&addr, config.timeout)?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| MailboxError::Connect(format!("invalid host name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Connect(format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            stream: BufReader::new(rustls::StreamOwned::new(conn, tcp)),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailboxError::Connect(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let n = self.stream.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(MailboxError::Connect("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn command(&mut self, cmd: &str) -> Result<Response, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        let mut response = Response::default();
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream.read_exact(&mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailboxError::Command {
                    command: verb,
                    reason: status.trim_end().to_string(),
                });
            }
            response.lines.push(line);
        }
    }

    fn login(&mut self, config: &ImapConfig) -> Result<(), MailboxError> {
        self.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))
        .map(|_| ())
    }

    /// Select the folder and return its UIDVALIDITY.
    fn select(&mut self, folder: &str) -> Result<u32, MailboxError> {
        let resp = self.command(&format!("SELECT {}", quote(folder)))?;
        resp.lines
            .iter()
            .find_map(|l| parse_uidvalidity(l))
            .ok_or_else(|| MailboxError::Command {
                command: "SELECT".into(),
                reason: "no UIDVALIDITY in response".into(),
            })
    }

    fn logout(&mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

fn fetch_unseen(config: &ImapConfig) -> Result<Vec<RawMessage>, MailboxError> {
    let mut session = Session::connect(config)?;
    session.login(config)?;
    let uidvalidity = session.select(&config.folder)?;

    let search = session.command("UID SEARCH UNSEEN")?;
    let uids = parse_search(&search.lines);

    let mut messages = Vec::with_capacity(uids.len());
    for uid in uids {
        let fetched = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        match fetched.literals.into_iter().next() {
            Some(raw) => messages.push(RawMessage {
                message_id: format_message_id(uidvalidity, uid),
                raw,
            }),
            None => warn!(uid, "FETCH returned no message body"),
        }
    }

    session.logout();
    Ok(messages)
}

fn store_seen(config: &ImapConfig, message_id: &str) -> Result<(), MailboxError> {
    let (uidvalidity, uid) =
        parse_message_id(message_id).ok_or_else(|| MailboxError::Command {
            command: "UID STORE".into(),
            reason: format!("malformed message id {message_id}"),
        })?;

    let mut session = Session::connect(config)?;
    session.login(config)?;
    let current = session.select(&config.folder)?;
    if current != uidvalidity {
        session.logout();
        return Err(MailboxError::Command {
            command: "UID STORE".into(),
            reason: format!("UIDVALIDITY changed ({uidvalidity} -> {current})"),
        });
    }

    session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
    session.logout();
    info!(message_id = %message_id, "Marked message seen");
    Ok(())
}

// ── Protocol helpers ────────────────────────────────────────────────

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Length of a `{n}` literal announced at the end of a response line.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    let body = trimmed.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

fn parse_uidvalidity(line: &str) -> Option<u32> {
    let start = line.find("[UIDVALIDITY ")? + "[UIDVALIDITY ".len();
    let rest = &line[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

fn parse_search(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|n| n.parse().ok()))
        .collect()
}

fn format_message_id(uidvalidity: u32, uid: u32) -> String {
    format!("{uidvalidity}:{uid}")
}

fn parse_message_id(id: &str) -> Option<(u32, u32)> {
    let (validity, uid) = id.split_once(':')?;
    Some((validity.parse().ok()?, uid.parse().ok()?))
}
