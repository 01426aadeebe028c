//! POP3 server (RFC 1939) over implicit TLS
//!
//! - [`server`]: TLS accept loop
//! - [`session`]: per-connection command dispatcher
//! - [`commands`]: command line parsing

pub mod commands;
pub mod server;
pub mod session;

pub use commands::Pop3Command;
pub use server::Pop3Server;
pub use session::Pop3Session;
