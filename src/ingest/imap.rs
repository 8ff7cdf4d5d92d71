//! Raw IMAP session over rustls TLS — the production `MailSource`.
//!
//! Speaks just enough IMAP for the ingestion loop: LOGIN, SELECT,
//! UID SEARCH, FETCH (UID), UID FETCH, LOGOUT. Blocking; run under
//! `spawn_blocking`.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::config::ImapOverride;
use crate::error::IngestError;
use crate::ingest::source::{MailSource, RawItem};
use crate::store::Mailbox;

/// Read timeout for the IMAP socket.
const READ_TIMEOUT_SECS: u64 = 30;

/// Resolved connection endpoint for one poll run.
#[derive(Debug, Clone)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
}

impl ImapEndpoint {
    /// Stored mailbox credentials, with the environment override taking
    /// precedence when present (credential rotation without a DB write).
    pub fn resolve(mailbox: &Mailbox, override_creds: Option<&ImapOverride>) -> Self {
        match override_creds {
            Some(o) => Self {
                host: o.host.clone(),
                port: o.port,
                username: o.username.clone(),
                password: o.password.expose_secret().to_string(),
                folder: mailbox.folder.clone(),
            },
            None => Self {
                host: mailbox.imap_host.clone(),
                port: mailbox.imap_port,
                username: mailbox.username.clone(),
                password: mailbox.password.clone(),
                folder: mailbox.folder.clone(),
            },
        }
    }
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One authenticated IMAP session with a folder selected.
pub struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
    /// Message count reported by SELECT, for the recovery window.
    exists: u32,
}

impl ImapSession {
    /// Connect, authenticate, and select the endpoint's folder.
    pub fn connect(endpoint: &ImapEndpoint) -> Result<Self, IngestError> {
        let connect_err = |reason: String| IngestError::Connect {
            host: endpoint.host.clone(),
            port: endpoint.port,
            reason,
        };

        let tcp = TcpStream::connect((&*endpoint.host, endpoint.port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)))
            .map_err(|e| connect_err(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(endpoint.host.clone())
                .map_err(|e| connect_err(format!("bad server name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| connect_err(e.to_string()))?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self {
            tls,
            tag_counter: 1,
            exists: 0,
        };

        let _greeting = session.read_line()?;

        let login = session.send_command(&format!(
            "LOGIN \"{}\" \"{}\"",
            endpoint.username, endpoint.password
        ))?;
        if !response_ok(&login) {
            return Err(IngestError::Auth {
                username: endpoint.username.clone(),
            });
        }

        let select = session.send_command(&format!("SELECT \"{}\"", endpoint.folder))?;
        if !response_ok(&select) {
            return Err(IngestError::Protocol(format!(
                "SELECT {} failed",
                endpoint.folder
            )));
        }
        session.exists = parse_exists(&select);

        Ok(session)
    }

    /// Best-effort LOGOUT.
    pub fn logout(mut self) {
        let _ = self.send_command("LOGOUT");
    }

    fn read_line(&mut self) -> Result<String, IngestError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err(IngestError::Protocol("connection closed".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(IngestError::Protocol(e.to_string())),
            }
        }
    }

    /// Send a tagged command and read until the tagged response line.
    fn send_command(&mut self, cmd: &str) -> Result<Vec<String>, IngestError> {
        let tag = format!("A{}", self.tag_counter);
        self.tag_counter += 1;

        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())
            .map_err(|e| IngestError::Protocol(e.to_string()))?;
        IoWrite::flush(&mut self.tls).map_err(|e| IngestError::Protocol(e.to_string()))?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, IngestError> {
        let lines = self.send_command(&format!("UID SEARCH {criteria}"))?;
        if !response_ok(&lines) {
            return Err(IngestError::Protocol(format!(
                "UID SEARCH {criteria} failed"
            )));
        }
        Ok(parse_search_ids(&lines))
    }
}

impl MailSource for ImapSession {
    fn search_since(&mut self, checkpoint: u32) -> Result<Vec<u32>, IngestError> {
        self.uid_search(&format!("UID {}:*", checkpoint.saturating_add(1)))
    }

    fn search_unseen(&mut self) -> Result<Vec<u32>, IngestError> {
        self.uid_search("UNSEEN")
    }

    fn recent_window(&mut self, n: usize) -> Result<Vec<u32>, IngestError> {
        if self.exists == 0 {
            return Ok(Vec::new());
        }
        // Resolve the newest sequence-number range to UIDs.
        let start = self.exists.saturating_sub(n as u32).saturating_add(1).max(1);
        let lines = self.send_command(&format!("FETCH {start}:{} (UID)", self.exists))?;
        if !response_ok(&lines) {
            return Err(IngestError::Protocol("FETCH (UID) failed".into()));
        }
        Ok(parse_fetch_uids(&lines))
    }

    fn fetch(&mut self, uid: u32) -> Result<RawItem, IngestError> {
        let lines = self.send_command(&format!("UID FETCH {uid} (RFC822)"))?;
        if !response_ok(&lines) {
            return Err(IngestError::Protocol(format!("UID FETCH {uid} failed")));
        }

        // Drop the untagged FETCH header, the closing paren, and the tagged
        // OK line; what remains is the literal.
        let raw: String = lines
            .iter()
            .skip(1)
            .take(lines.len().saturating_sub(3))
            .cloned()
            .collect();

        Ok(RawItem {
            uid,
            raw: raw.into_bytes(),
        })
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Tagged response ends with "<tag> OK ...".
fn response_ok(lines: &[String]) -> bool {
    lines
        .last()
        .is_some_and(|l| l.split_whitespace().nth(1) == Some("OK"))
}

/// Extract ids from `* SEARCH 1 2 3` lines.
fn parse_search_ids(lines: &[String]) -> Vec<u32> {
    let mut ids = Vec::new();
    for line in lines {
        if line.starts_with("* SEARCH") {
            ids.extend(
                line.split_whitespace()
                    .skip(2)
                    .filter_map(|s| s.parse::<u32>().ok()),
            );
        }
    }
    ids
}

/// Extract UIDs from `* 12 FETCH (UID 457)` lines.
fn parse_fetch_uids(lines: &[String]) -> Vec<u32> {
    let mut uids = Vec::new();
    for line in lines {
        if !line.starts_with('*') || !line.contains("FETCH") {
            continue;
        }
        if let Some(pos) = line.find("UID ") {
            let rest = &line[pos + 4..];
            let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
            if let Ok(uid) = digits.parse() {
                uids.push(uid);
            }
        }
    }
    uids
}

/// Extract the EXISTS count from a SELECT response.
fn parse_exists(lines: &[String]) -> u32 {
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 3
            && parts[0] == "*"
            && parts[2] == "EXISTS"
            && let Ok(n) = parts[1].parse()
        {
            return n;
        }
    }
    0
}
