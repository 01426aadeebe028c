//! POP3 session state machine
//!
//! USER and PASS are accepted without verification, so a session is live
//! from the greeting until QUIT. The mailbox is snapshotted once at
//! connection time. Deletion is disabled: DELE is always refused and QUIT
//! never removes anything.

use crate::codec::{trim_line_ending, LineCodec};
use crate::error::Result;
use crate::pop3::commands::{parse_index, parse_top_args, Pop3Command};
use crate::security::auth::redact;
use crate::storage::maildir::{read_message, split_headers_body};
use crate::storage::{MailboxEntry, MailboxSnapshot};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

const CAPABILITIES: &[&str] = &["USER", "TOP", "UIDL", "PIPELINING", "RESP-CODES"];

const ERR_NO_SUCH_MESSAGE: &str = "-ERR no such message";

/// Whether the session loop keeps reading
enum SessionResult {
    Continue,
    Quit,
}

pub struct Pop3Session {
    hostname: String,
    maildir_path: PathBuf,
    snapshot: MailboxSnapshot,
    /// Session-local marks; cleared by RSET, never applied to disk
    deleted: HashSet<usize>,
    user: Option<String>,
}

impl Pop3Session {
    pub fn new(hostname: String, maildir_path: PathBuf) -> Self {
        Self {
            hostname,
            maildir_path,
            snapshot: MailboxSnapshot::default(),
            deleted: HashSet::new(),
            user: None,
        }
    }

    /// Run the session until QUIT or end of stream.
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut codec = LineCodec::new(stream);

        // Mailbox is user-independent and fixed for the whole session
        self.snapshot = MailboxSnapshot::load(&self.maildir_path);
        info!(
            "POP3 session opened with {} message(s) from {}",
            self.snapshot.len(),
            self.maildir_path.display()
        );

        codec
            .write_line(&format!("+OK {} POP3 Ready", self.hostname))
            .await?;

        while let Some(raw) = codec.read_line().await? {
            let line = String::from_utf8_lossy(trim_line_ending(&raw)).to_string();

            let command = match Pop3Command::parse(&line) {
                Ok(command) => command,
                Err(e) => {
                    debug!("{}", e);
                    codec.write_line("-ERR invalid").await?;
                    continue;
                }
            };

            if let SessionResult::Quit = self.handle_command(command, &mut codec).await? {
                if let Err(e) = codec.shutdown().await {
                    debug!("Shutdown after QUIT failed: {}", e);
                }
                break;
            }
        }

        debug!("POP3 session ended");
        Ok(())
    }

    async fn handle_command<S>(
        &mut self,
        command: Pop3Command,
        codec: &mut LineCodec<S>,
    ) -> Result<SessionResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match command {
            Pop3Command::Capa => {
                let mut lines = vec!["+OK Capability list follows"];
                lines.extend_from_slice(CAPABILITIES);
                lines.push(".");
                codec.write_lines(&lines).await?;
            }
            Pop3Command::Noop => codec.write_line("+OK").await?,
            Pop3Command::User(user) => {
                info!("USER {}", user);
                self.user = Some(user);
                codec.write_line("+OK").await?;
            }
            Pop3Command::Pass(pass) => {
                info!(
                    user = self.user.as_deref().unwrap_or(""),
                    pass = %redact(&pass),
                    "PASS"
                );
                codec.write_line("+OK").await?;
            }
            Pop3Command::Stat => {
                let (count, octets) = self
                    .snapshot
                    .visible(&self.deleted)
                    .fold((0usize, 0u64), |(count, octets), (_, entry)| {
                        (count + 1, octets + entry.size)
                    });
                codec.write_line(&format!("+OK {} {}", count, octets)).await?;
            }
            Pop3Command::List(Some(arg)) => match self.lookup(&arg) {
                Some((n, entry)) => {
                    let reply = format!("+OK {} {}", n, entry.size);
                    codec.write_line(&reply).await?;
                }
                None => codec.write_line(ERR_NO_SUCH_MESSAGE).await?,
            },
            Pop3Command::List(None) => {
                let listing: Vec<String> = self
                    .snapshot
                    .visible(&self.deleted)
                    .map(|(n, entry)| format!("{} {}", n, entry.size))
                    .collect();

                let mut lines = Vec::with_capacity(listing.len() + 2);
                lines.push(format!("+OK {} messages", listing.len()));
                lines.extend(listing);
                lines.push(".".to_string());
                codec.write_lines(&lines).await?;
            }
            Pop3Command::Uidl(Some(arg)) => match self.lookup(&arg) {
                Some((n, entry)) => {
                    let reply = format!("+OK {} {}", n, entry.uid);
                    codec.write_line(&reply).await?;
                }
                None => codec.write_line(ERR_NO_SUCH_MESSAGE).await?,
            },
            Pop3Command::Uidl(None) => {
                let mut lines = vec!["+OK".to_string()];
                lines.extend(
                    self.snapshot
                        .visible(&self.deleted)
                        .map(|(n, entry)| format!("{} {}", n, entry.uid)),
                );
                lines.push(".".to_string());
                codec.write_lines(&lines).await?;
            }
            Pop3Command::Retr(arg) => {
                let Some((n, entry)) = self.lookup(&arg) else {
                    codec.write_line(ERR_NO_SUCH_MESSAGE).await?;
                    return Ok(SessionResult::Continue);
                };

                let content = read_message(&entry.path);
                let data = content.as_bytes();
                info!("RETR {} ({} octets)", n, data.len());
                codec
                    .write_line(&format!("+OK {} octets", data.len()))
                    .await?;
                codec.send_multiline(data).await?;
            }
            Pop3Command::Top(args) => {
                let (index, lines) = parse_top_args(&args);
                let Some((n, entry)) = index.and_then(|n| self.entry(n)) else {
                    codec.write_line(ERR_NO_SUCH_MESSAGE).await?;
                    return Ok(SessionResult::Continue);
                };

                let content = read_message(&entry.path);
                let payload = top_payload(content.as_bytes(), lines);
                debug!("TOP {} {} ({} bytes)", n, lines, payload.len());
                codec.write_line("+OK").await?;
                codec.send_multiline(&payload).await?;
            }
            Pop3Command::Dele(arg) => {
                warn!("DELE {} refused: deletion disabled", arg);
                codec.write_line("-ERR delete disabled").await?;
            }
            Pop3Command::Rset => {
                self.deleted.clear();
                codec.write_line("+OK").await?;
            }
            Pop3Command::Quit => {
                codec.write_line("+OK bye").await?;
                info!("POP3 logout, deleted 0");
                return Ok(SessionResult::Quit);
            }
            Pop3Command::Unknown(verb) => {
                debug!("Unknown POP3 command: {}", verb);
                codec.write_line("-ERR unknown command").await?;
            }
        }

        Ok(SessionResult::Continue)
    }

    /// Resolve a message-number argument
    fn lookup(&self, arg: &str) -> Option<(usize, MailboxEntry)> {
        parse_index(arg).and_then(|n| self.entry(n))
    }

    /// Entry `n` unless it is out of range or marked deleted
    fn entry(&self, n: usize) -> Option<(usize, MailboxEntry)> {
        if self.deleted.contains(&n) {
            return None;
        }
        self.snapshot.get(n).map(|entry| (n, entry.clone()))
    }
}

/// Header block, a blank line, then the first `lines` body lines.
fn top_payload(content: &[u8], lines: i64) -> Vec<u8> {
    let (headers, body) = split_headers_body(content);

    let mut payload = Vec::with_capacity(headers.len() + 4);
    payload.extend_from_slice(headers);
    payload.extend_from_slice(b"\r\n\r\n");

    if lines > 0 {
        let selected: Vec<&[u8]> = body
            .split(|&b| b == b'\n')
            .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
            .take(lines as usize)
            .collect();
        payload.extend_from_slice(&selected.join(&b"\r\n"[..]));
    }
    payload
}
