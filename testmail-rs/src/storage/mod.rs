//! Message storage
//!
//! - [`maildir`]: read-only mailbox snapshot served over POP3
//! - [`spool`]: content-addressed store for messages accepted over SMTP

pub mod maildir;
pub mod spool;

pub use maildir::{MailboxEntry, MailboxSnapshot, MessageContent};
pub use spool::Spool;
