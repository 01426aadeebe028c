//! SMTP session state machine
//!
//! Each line is routed by two sub-states before command parsing: while a
//! DATA block is open every line is message content, and while an AUTH
//! challenge is pending every line is a base64 response. Credentials are
//! recorded but never checked.

use crate::codec::{trim_line_ending, unstuff_block, LineCodec, TERMINATOR};
use crate::error::Result;
use crate::security::auth::{decode_base64_lenient, decode_plain};
use crate::security::{AuthMechanism, Credentials};
use crate::smtp::commands::SmtpCommand;
use crate::smtp::relay::Delivery;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// base64 "Username:"
const USERNAME_PROMPT: &str = "334 VXNlcm5hbWU6";
/// base64 "Password:"
const PASSWORD_PROMPT: &str = "334 UGFzc3dvcmQ6";
/// Empty PLAIN challenge
const PLAIN_PROMPT: &str = "334 ";

/// Pending AUTH challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    None,
    AwaitingLoginUser,
    AwaitingLoginPass { username: String },
    AwaitingPlainResponse,
}

/// Result of processing one line
enum SessionResult {
    Continue,
    Quit,
}

pub struct SmtpSession {
    hostname: String,
    max_message_size: usize,
    log_credentials: bool,
    delivery: Arc<Delivery>,
    mail_from: Option<String>,
    recipients: Vec<String>,
    in_data: bool,
    /// DATA lines with their original terminators, still dot-stuffed
    data_lines: Vec<Vec<u8>>,
    authenticated: bool,
    credentials: Option<Credentials>,
    challenge: AuthChallenge,
}

impl SmtpSession {
    pub fn new(hostname: String, max_message_size: usize, delivery: Arc<Delivery>) -> Self {
        Self {
            hostname,
            max_message_size,
            log_credentials: false,
            delivery,
            mail_from: None,
            recipients: Vec::new(),
            in_data: false,
            data_lines: Vec::new(),
            authenticated: false,
            credentials: None,
            challenge: AuthChallenge::None,
        }
    }

    /// Log AUTH passwords in plaintext (diagnostics only)
    pub fn with_credential_logging(mut self, enabled: bool) -> Self {
        self.log_credentials = enabled;
        self
    }

    /// Run the session until QUIT or end of stream.
    pub async fn handle<S>(mut self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut codec = LineCodec::new(stream);
        codec
            .write_line(&format!("220 {} ESMTP", self.hostname))
            .await?;

        while let Some(raw) = codec.read_line().await? {
            if let SessionResult::Quit = self.process_line(raw, &mut codec).await? {
                if let Err(e) = codec.shutdown().await {
                    debug!("Shutdown after QUIT failed: {}", e);
                }
                break;
            }
        }

        if self.in_data {
            warn!(
                "Client disconnected during DATA, {} line(s) discarded",
                self.data_lines.len()
            );
        }
        debug!("SMTP session ended");
        Ok(())
    }

    async fn process_line<S>(
        &mut self,
        raw: Vec<u8>,
        codec: &mut LineCodec<S>,
    ) -> Result<SessionResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.in_data {
            if trim_line_ending(&raw) == TERMINATOR {
                self.finish_message(codec).await?;
            } else {
                self.data_lines.push(raw);
            }
            return Ok(SessionResult::Continue);
        }

        let line = String::from_utf8_lossy(trim_line_ending(&raw)).to_string();

        if self.challenge != AuthChallenge::None {
            self.continue_auth(&line, codec).await?;
            return Ok(SessionResult::Continue);
        }

        self.handle_command(SmtpCommand::parse(&line), codec).await
    }

    async fn handle_command<S>(
        &mut self,
        cmd: SmtpCommand,
        codec: &mut LineCodec<S>,
    ) -> Result<SessionResult>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match cmd {
            SmtpCommand::Ehlo(domain) | SmtpCommand::Helo(domain) => {
                info!("EHLO from {}", domain);
                let lines = [
                    format!("250-{}", self.hostname),
                    "250-AUTH LOGIN PLAIN".to_string(),
                    "250-AUTH=LOGIN PLAIN".to_string(),
                    format!("250 SIZE {}", self.max_message_size),
                ];
                codec.write_lines(&lines).await?;
            }
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => self.start_auth(&mechanism, initial_response, codec).await?,
            SmtpCommand::MailFrom(from) => {
                if !self.authenticated {
                    warn!("MAIL FROM rejected: authentication required");
                    codec.write_line("530 5.7.0 Authentication required").await?;
                    return Ok(SessionResult::Continue);
                }
                match from {
                    Some(from) => {
                        info!("MAIL FROM: {}", from);
                        self.mail_from = Some(from);
                        codec.write_line("250 OK").await?;
                    }
                    None => codec.write_line("501 Syntax: MAIL FROM:<address>").await?,
                }
            }
            // Not gated on authentication, unlike MAIL
            SmtpCommand::RcptTo(to) => match to {
                Some(to) => {
                    info!("RCPT TO: {}", to);
                    self.recipients.push(to);
                    codec.write_line("250 OK").await?;
                }
                None => codec.write_line("501 Syntax: RCPT TO:<address>").await?,
            },
            SmtpCommand::Data => {
                if !self.authenticated {
                    warn!("DATA rejected: authentication required");
                    codec.write_line("530 5.7.0 Authentication required").await?;
                } else if self.mail_from.is_none() || self.recipients.is_empty() {
                    codec.write_line("503 Bad sequence of commands").await?;
                } else {
                    self.in_data = true;
                    self.data_lines.clear();
                    codec
                        .write_line("354 End data with <CR><LF>.<CR><LF>")
                        .await?;
                }
            }
            SmtpCommand::Noop => codec.write_line("250 OK").await?,
            SmtpCommand::Rset => {
                self.reset_transaction();
                codec.write_line("250 OK").await?;
            }
            SmtpCommand::Quit => {
                codec.write_line("221 Bye").await?;
                return Ok(SessionResult::Quit);
            }
            SmtpCommand::Unknown(cmd) => {
                debug!("Unknown command: {}", cmd);
                codec.write_line("502 Command not implemented").await?;
            }
        }

        Ok(SessionResult::Continue)
    }

    /// AUTH command line
    async fn start_auth<S>(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
        codec: &mut LineCodec<S>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match (AuthMechanism::parse(mechanism), initial_response) {
            (Some(AuthMechanism::Plain), Some(initial)) => {
                let credentials = decode_plain(&initial);
                if credentials.username.is_empty() || credentials.password.is_empty() {
                    // Incomplete initial response: ask again with an empty challenge
                    self.challenge = AuthChallenge::AwaitingPlainResponse;
                    codec.write_line(PLAIN_PROMPT).await?;
                } else {
                    self.complete_auth(AuthMechanism::Plain, credentials);
                    codec
                        .write_line("235 2.7.0 Authentication successful")
                        .await?;
                }
            }
            (Some(AuthMechanism::Plain), None) => {
                self.challenge = AuthChallenge::AwaitingPlainResponse;
                codec.write_line(PLAIN_PROMPT).await?;
            }
            (Some(AuthMechanism::Login), Some(initial)) => {
                self.challenge = AuthChallenge::AwaitingLoginPass {
                    username: decode_base64_lenient(&initial),
                };
                codec.write_line(PASSWORD_PROMPT).await?;
            }
            (Some(AuthMechanism::Login), None) => {
                self.challenge = AuthChallenge::AwaitingLoginUser;
                codec.write_line(USERNAME_PROMPT).await?;
            }
            (None, _) => {
                warn!("AUTH {} not supported", mechanism);
                codec
                    .write_line("504 Unrecognized authentication type")
                    .await?;
            }
        }
        Ok(())
    }

    /// A line received while an AUTH challenge is pending
    async fn continue_auth<S>(&mut self, line: &str, codec: &mut LineCodec<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match std::mem::replace(&mut self.challenge, AuthChallenge::None) {
            AuthChallenge::None => {}
            AuthChallenge::AwaitingLoginUser => {
                let username = decode_base64_lenient(line);
                if username.is_empty() {
                    self.challenge = AuthChallenge::AwaitingLoginUser;
                    codec.write_line(USERNAME_PROMPT).await?;
                } else {
                    self.challenge = AuthChallenge::AwaitingLoginPass { username };
                    codec.write_line(PASSWORD_PROMPT).await?;
                }
            }
            AuthChallenge::AwaitingLoginPass { username } => {
                let password = decode_base64_lenient(line);
                if password.is_empty() {
                    self.challenge = AuthChallenge::AwaitingLoginPass { username };
                    codec.write_line(PASSWORD_PROMPT).await?;
                } else {
                    self.complete_auth(AuthMechanism::Login, Credentials::new(username, password));
                    codec
                        .write_line("235 2.7.0 Authentication successful")
                        .await?;
                }
            }
            AuthChallenge::AwaitingPlainResponse => {
                // Always completes, even with empty parts
                self.complete_auth(AuthMechanism::Plain, decode_plain(line));
                codec.write_line("235 Authentication successful").await?;
            }
        }
        Ok(())
    }

    fn complete_auth(&mut self, mechanism: AuthMechanism, credentials: Credentials) {
        credentials.log(mechanism, self.log_credentials);
        self.credentials = Some(credentials);
        self.challenge = AuthChallenge::None;
        self.authenticated = true;
    }

    /// Terminator received: acknowledge, then persist and relay.
    async fn finish_message<S>(&mut self, codec: &mut LineCodec<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.in_data = false;
        let raw_message = unstuff_block(&self.data_lines);
        let from = self.mail_from.take().unwrap_or_default();
        let recipients = std::mem::take(&mut self.recipients);
        self.data_lines.clear();

        info!(
            "Message received from {} for {} recipient(s), {} bytes",
            from,
            recipients.len(),
            raw_message.len()
        );

        // Acceptance does not depend on the outcome below
        codec.write_line("250 OK queued").await?;

        match self
            .delivery
            .deliver(&from, &recipients, &raw_message, self.credentials.as_ref())
            .await
        {
            Ok(path) => debug!("Message processed, stored at {}", path.display()),
            Err(e) => {
                error!("Message processing failed: {}", e);
                codec
                    .write_line("451 Requested action aborted: local error in processing")
                    .await?;
            }
        }

        Ok(())
    }

    fn reset_transaction(&mut self) {
        self.mail_from = None;
        self.recipients.clear();
        self.data_lines.clear();
        self.in_data = false;
    }
}
