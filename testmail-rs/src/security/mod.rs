//! Security module
//!
//! - [`auth`]: SASL PLAIN/LOGIN decoding and credential redaction
//! - [`tls`]: implicit-TLS acceptor and self-signed certificates

pub mod auth;
pub mod tls;

pub use auth::{AuthMechanism, Credentials};
pub use tls::TlsConfig;
