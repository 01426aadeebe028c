//! testmail-rs: throwaway POP3 and SMTP servers for mail client testing
//!
//! Both servers speak implicit TLS and accept any credentials. The POP3
//! server projects a single maildir-like directory as a read-only mailbox;
//! the SMTP server stores every accepted message under its content hash and
//! can optionally relay it downstream.
//!
//! # Example
//!
//! ```no_run
//! use testmail_rs::config::Config;
//! use testmail_rs::smtp::SmtpServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let server = SmtpServer::new(config);
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`codec`]: CRLF line framing and dot-stuffing
//! - [`storage`]: mailbox snapshots and the receive spool
//! - [`pop3`]: POP3 session engine and server
//! - [`smtp`]: SMTP session engine, server and relay
//! - [`security`]: TLS bootstrap and SASL decoding
//! - [`config`]: Configuration management
//! - [`error`]: Error types and handling

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod pop3;
pub mod security;
pub mod smtp;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{MailError, Result};
