//! SMTP client used as the outbound relay
//!
//! One connection carries every recipient of a message: greeting and EHLO
//! (plus AUTH PLAIN when credentials are forwarded) on connect, a
//! MAIL/RCPT/DATA transaction per recipient, QUIT on disconnect.

use crate::codec::{trim_line_ending, LineCodec};
use crate::error::{MailError, Result};
use crate::security::Credentials;
use crate::smtp::relay::{Relay, RelayMessage, Transfer};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// SMTP client for handing accepted mail to a downstream server
pub struct SmtpClient {
    server_addr: String,
    credentials: Option<Credentials>,
    connection: Option<LineCodec<TcpStream>>,
}

impl SmtpClient {
    /// Create a new SMTP client
    pub fn new(server_addr: String) -> Self {
        Self {
            server_addr,
            credentials: None,
            connection: None,
        }
    }

    /// Authenticate with AUTH PLAIN after EHLO
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn connection(&mut self) -> Result<&mut LineCodec<TcpStream>> {
        self.connection
            .as_mut()
            .ok_or_else(|| MailError::Relay("Not connected".to_string()))
    }

    /// Write a command and check the reply code prefix
    async fn command(&mut self, line: &str, expected: &str) -> Result<String> {
        debug!("> {}", line);
        self.connection()?.write_line(line).await?;
        self.read_response(expected).await
    }

    /// Read a (possibly multi-line) response and verify its code prefix
    async fn read_response(&mut self, expected: &str) -> Result<String> {
        let connection = self.connection()?;
        let mut full_response = String::new();

        loop {
            let raw = connection
                .read_line()
                .await?
                .ok_or_else(|| MailError::Relay("Connection closed by relay".to_string()))?;
            let line = String::from_utf8_lossy(trim_line_ending(&raw)).to_string();
            debug!("< {}", line);

            full_response.push_str(&line);
            full_response.push('\n');

            // Last line has a space (or nothing) after the code
            if line.as_bytes().get(3) != Some(&b'-') {
                break;
            }
        }

        if !full_response.starts_with(expected) {
            error!("Unexpected response: {}", full_response.trim_end());
            return Err(MailError::Relay(format!(
                "Expected {}, got: {}",
                expected,
                full_response.trim_end()
            )));
        }

        Ok(full_response)
    }

    /// Get local hostname
    fn get_hostname(&self) -> String {
        gethostname::gethostname().to_string_lossy().to_string()
    }
}

#[async_trait]
impl Transfer for SmtpClient {
    async fn connect(&mut self, sender: &str) -> Result<()> {
        info!("Connecting to relay {} for {}", self.server_addr, sender);

        let stream = TcpStream::connect(&self.server_addr).await.map_err(|e| {
            MailError::Relay(format!("Cannot connect to {}: {}", self.server_addr, e))
        })?;
        self.connection = Some(LineCodec::new(stream));

        self.read_response("220").await?;
        let ehlo = format!("EHLO {}", self.get_hostname());
        self.command(&ehlo, "250").await?;

        if let Some(credentials) = self.credentials.clone() {
            let token = BASE64.encode(format!(
                "\0{}\0{}",
                credentials.username, credentials.password
            ));
            self.command(&format!("AUTH PLAIN {}", token), "235").await?;
        }

        Ok(())
    }

    async fn send(&mut self, sender: &str, recipient: &str, message: &RelayMessage) -> Result<()> {
        let result = async {
            self.command(&format!("MAIL FROM:<{}>", sender), "250").await?;
            self.command(&format!("RCPT TO:<{}>", recipient), "25").await?;
            self.command("DATA", "354").await?;
            self.connection()?.send_multiline(&message.to_bytes()).await?;
            self.read_response("250").await?;
            Ok::<(), MailError>(())
        }
        .await;

        if result.is_err() && self.connection.is_some() {
            // Leave the relay ready for the next recipient
            if let Err(e) = self.command("RSET", "250").await {
                warn!("RSET after failed relay to {} failed: {}", recipient, e);
            }
        }

        if result.is_ok() {
            info!("Mail relayed to {}", recipient);
        }
        result
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connection.is_none() {
            return Ok(());
        }
        let result = self.command("QUIT", "221").await;
        self.connection = None;
        result.map(|_| ())
    }
}

/// Opens an [`SmtpClient`] per relayed message
pub struct SmtpRelay {
    server_addr: String,
}

impl SmtpRelay {
    pub fn new(server_addr: String) -> Self {
        Self { server_addr }
    }
}

impl Relay for SmtpRelay {
    fn open(&self, credentials: Option<Credentials>) -> Box<dyn Transfer> {
        Box::new(SmtpClient::new(self.server_addr.clone()).with_credentials(credentials))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SmtpClient::new("mail.example.com:25".to_string());
        assert_eq!(client.server_addr, "mail.example.com:25");
        assert!(client.connection.is_none());
    }

    #[tokio::test]
    async fn test_send_without_connect_fails() {
        let mut client = SmtpClient::new("127.0.0.1:1".to_string());
        let message = RelayMessage::new(vec![], Vec::new()).unwrap();
        let result = client.send("a@b", "c@d", &message).await;
        assert!(matches!(result, Err(MailError::Relay(_))));
    }
}
