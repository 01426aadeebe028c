//! Submission-style SMTP server (implicit TLS) and relay client
//!
//! - [`server`]: TLS accept loop
//! - [`session`]: SMTP session state machine, including AUTH challenges
//! - [`commands`]: SMTP command parsing
//! - [`relay`]: persistence and relay of accepted messages
//! - [`client`]: SMTP client used as the default relay transport

pub mod client;
pub mod commands;
pub mod relay;
pub mod server;
pub mod session;

pub use client::{SmtpClient, SmtpRelay};
pub use commands::SmtpCommand;
pub use relay::{Delivery, Relay, RelayMessage, Transfer};
pub use server::SmtpServer;
pub use session::SmtpSession;
