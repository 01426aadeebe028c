//! Message hand-off for accepted SMTP transactions
//!
//! Every accepted message is persisted to the [`Spool`] first. When relaying
//! is enabled it is then rebuilt as a [`RelayMessage`] and sent once per
//! recipient over a single [`Transfer`] opened from the configured [`Relay`].

use crate::error::{MailError, Result};
use crate::security::Credentials;
use crate::storage::Spool;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Message as handed to the outbound agent: unfolded header lines plus body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub headers: Vec<String>,
    pub body: Vec<u8>,
}

impl RelayMessage {
    pub fn new(headers: Vec<String>, body: Vec<u8>) -> Result<Self> {
        if let Some(bad) = headers.iter().find(|h| !h.contains(':')) {
            return Err(MailError::Parse(format!("Malformed header line {:?}", bad)));
        }
        Ok(Self { headers, body })
    }

    /// Split a raw message at the first empty line (CRLF or bare LF) and
    /// rejoin folded header continuation lines.
    pub fn from_raw(raw: &[u8]) -> Result<Self> {
        let (header_block, body) = split_at_blank_line(raw);
        let header_block = String::from_utf8_lossy(header_block);

        let mut headers: Vec<String> = Vec::new();
        let mut current = String::new();
        for line in header_block.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.starts_with(' ') || line.starts_with('\t') {
                // folded continuation
                current.push_str(line);
            } else {
                if !current.is_empty() {
                    headers.push(std::mem::take(&mut current));
                }
                current = line.to_string();
            }
        }
        if !current.is_empty() {
            headers.push(current);
        }

        Self::new(headers, body.to_vec())
    }

    /// Wire form: headers, empty line, body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + self.headers.len() * 64);
        for header in &self.headers {
            out.extend_from_slice(header.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn split_at_blank_line(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\n' {
            let rest = &raw[i + 1..];
            if rest.starts_with(b"\r\n") {
                let start = if i > 0 && raw[i - 1] == b'\r' { i - 1 } else { i };
                return (&raw[..start], &raw[i + 3..]);
            }
            if rest.starts_with(b"\n") {
                let start = if i > 0 && raw[i - 1] == b'\r' { i - 1 } else { i };
                return (&raw[..start], &raw[i + 2..]);
            }
        }
        i += 1;
    }
    (raw, &[])
}

/// One outbound session: connect once, send per recipient, disconnect.
#[async_trait]
pub trait Transfer: Send {
    async fn connect(&mut self, sender: &str) -> Result<()>;

    async fn send(&mut self, sender: &str, recipient: &str, message: &RelayMessage) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// Factory for outbound sessions
pub trait Relay: Send + Sync {
    /// `credentials` are the submitting client's AUTH credentials when
    /// forwarding is enabled.
    fn open(&self, credentials: Option<Credentials>) -> Box<dyn Transfer>;
}

/// Persistence plus optional relay, shared by all SMTP sessions of a server
pub struct Delivery {
    spool: Spool,
    relay: Option<Arc<dyn Relay>>,
    forward_credentials: bool,
}

impl Delivery {
    pub fn new(spool: Spool) -> Self {
        Self {
            spool,
            relay: None,
            forward_credentials: false,
        }
    }

    pub fn with_relay(mut self, relay: Arc<dyn Relay>, forward_credentials: bool) -> Self {
        self.relay = Some(relay);
        self.forward_credentials = forward_credentials;
        self
    }

    /// Store `raw`, then relay it if enabled. Returns the stored path.
    ///
    /// A recipient that fails does not stop delivery to the others; the
    /// first failure is returned once every recipient has been tried.
    pub async fn deliver(
        &self,
        from: &str,
        recipients: &[String],
        raw: &[u8],
        credentials: Option<&Credentials>,
    ) -> Result<PathBuf> {
        let path = self.spool.store(raw).await?;

        let Some(relay) = &self.relay else {
            return Ok(path);
        };

        let message = RelayMessage::from_raw(raw)?;
        let credentials = if self.forward_credentials {
            credentials.cloned()
        } else {
            None
        };

        let mut transfer = relay.open(credentials);
        transfer.connect(from).await?;

        let mut first_error = None;
        for to in recipients {
            info!("Relaying from {} to {}", from, to);
            if let Err(e) = transfer.send(from, to, &message).await {
                warn!("Relay to {} failed: {}", to, e);
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = transfer.disconnect().await {
            warn!("Relay disconnect failed: {}", e);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(path),
        }
    }
}
