//! SMTP AUTH decoding (PLAIN, RFC 4616; LOGIN)
//!
//! Credentials are never verified. Decoding is lenient: anything that is not
//! valid base64 or UTF-8 decodes to an empty string and the session decides
//! whether to re-prompt.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use tracing::info;

/// Log target for plaintext credential output
pub const CREDENTIALS_TARGET: &str = "testmail_rs::credentials";

/// SASL mechanisms advertised in EHLO
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// PLAIN mechanism (RFC 4616)
    Plain,
    /// LOGIN mechanism
    Login,
}

impl AuthMechanism {
    /// Parse mechanism from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

/// Username/password pair captured from an AUTH exchange
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Log the credentials. The password is masked unless `plaintext` is set.
    pub fn log(&self, mechanism: AuthMechanism, plaintext: bool) {
        if plaintext {
            info!(
                target: CREDENTIALS_TARGET,
                mechanism = mechanism.as_str(),
                user = %self.username,
                pass = %self.password,
                "AUTH credentials"
            );
        } else {
            info!(
                mechanism = mechanism.as_str(),
                user = %self.username,
                pass = %redact(&self.password),
                "AUTH credentials"
            );
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

/// Decode one base64 SASL line; invalid input yields an empty string.
pub fn decode_base64_lenient(data: &str) -> String {
    BASE64
        .decode(data.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Decode a PLAIN response `authzid\0authcid\0password`.
///
/// The authorization identity is discarded; missing parts are empty strings.
pub fn decode_plain(data: &str) -> Credentials {
    let decoded = decode_base64_lenient(data);
    let mut parts = decoded.splitn(3, '\0');
    let _authzid = parts.next();
    let authcid = parts.next().unwrap_or_default();
    let password = parts.next().unwrap_or_default();
    Credentials::new(authcid, password)
}

/// Keep the first and last character, mask the rest. Two characters or fewer
/// are fully masked.
pub fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => String::new(),
        n if n <= 2 => "*".repeat(n),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}
