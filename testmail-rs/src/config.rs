use crate::error::{MailError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Value advertised as the ESMTP `SIZE` extension.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 35_882_577;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub pop3: Pop3Config,
    pub smtp: SmtpConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pop3Config {
    pub listen_addr: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    /// Single mailbox served to every POP3 login
    pub maildir_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub listen_addr: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    /// Every accepted message is written here, named by its content hash
    pub receive_dir: String,
    pub relay_enabled: bool,
    pub relay_addr: String,
    /// Replay the client's AUTH credentials against the relay
    pub forward_credentials: bool,
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    /// Diagnostic only: log SMTP AUTH credentials in plaintext
    #[serde(default)]
    pub log_credentials: bool,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| MailError::Config(e.to_string()))
    }

    /// Load `path` (defaults when `None`), then apply `MAILSERVER_*`
    /// environment overrides. A missing file is an error.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.as_ref().exists() => Self::from_file(path)?,
            Some(path) => {
                return Err(MailError::Config(format!(
                    "config file {} not found",
                    path.as_ref().display()
                )))
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlay values from an environment lookup.
    ///
    /// Address and port are separate variables; either one may be set alone.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(hostname) = lookup("MAILSERVER_HOSTNAME") {
            self.server.hostname = hostname;
        }

        self.pop3.listen_addr = merge_listen_addr(
            &self.pop3.listen_addr,
            lookup("MAILSERVER_POP3_ADDRESS"),
            lookup("MAILSERVER_POP3_PORT"),
        )?;
        if let Some(cert) = lookup("MAILSERVER_POP3_TLSCERT") {
            self.pop3.tls_cert_path = cert;
        }
        if let Some(key) = lookup("MAILSERVER_POP3_TLSKEY") {
            self.pop3.tls_key_path = key;
        }
        if let Some(maildir) = lookup("MAILSERVER_POP3_MAILDIR") {
            self.pop3.maildir_path = maildir;
        }

        self.smtp.listen_addr = merge_listen_addr(
            &self.smtp.listen_addr,
            lookup("MAILSERVER_SMTP_ADDRESS"),
            lookup("MAILSERVER_SMTP_PORT"),
        )?;
        if let Some(cert) = lookup("MAILSERVER_SMTP_TLSCERT") {
            self.smtp.tls_cert_path = cert;
        }
        if let Some(key) = lookup("MAILSERVER_SMTP_TLSKEY") {
            self.smtp.tls_key_path = key;
        }
        if let Some(dir) = lookup("MAILSERVER_SMTP_RECV_MAILDIR") {
            self.smtp.receive_dir = dir;
        }
        if let Some(enabled) = lookup("MAILSERVER_SMTP_RECV_ENABLED") {
            self.smtp.relay_enabled = parse_bool("MAILSERVER_SMTP_RECV_ENABLED", &enabled)?;
        }
        if let Some(addr) = lookup("MAILSERVER_SMTP_RELAY_ADDR") {
            self.smtp.relay_addr = addr;
        }

        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                hostname: "localhost".to_string(),
            },
            pop3: Pop3Config {
                listen_addr: "0.0.0.0:1995".to_string(),
                tls_cert_path: "tls.crt".to_string(),
                tls_key_path: "tls.key".to_string(),
                maildir_path: "maildir".to_string(),
            },
            smtp: SmtpConfig {
                listen_addr: "0.0.0.0:465".to_string(),
                tls_cert_path: "tls.crt".to_string(),
                tls_key_path: "tls.key".to_string(),
                receive_dir: "maildir".to_string(),
                relay_enabled: false,
                relay_addr: "127.0.0.1:25".to_string(),
                forward_credentials: true,
                max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                log_credentials: false,
            },
        }
    }
}

fn merge_listen_addr(current: &str, host: Option<String>, port: Option<String>) -> Result<String> {
    let (current_host, current_port) = current.rsplit_once(':').unwrap_or((current, ""));

    let port = match port {
        Some(port) => port
            .trim()
            .parse::<u16>()
            .map_err(|e| MailError::Config(format!("invalid port {:?}: {}", port, e)))?
            .to_string(),
        None => current_port.to_string(),
    };
    let host = host.unwrap_or_else(|| current_host.to_string());

    Ok(format!("{}:{}", host, port))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(MailError::Config(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pop3.listen_addr, "0.0.0.0:1995");
        assert_eq!(config.smtp.listen_addr, "0.0.0.0:465");
        assert_eq!(config.smtp.max_message_size, 35_882_577);
        assert!(!config.smtp.relay_enabled);
        assert!(!config.logging.log_credentials);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("MAILSERVER_HOSTNAME", "mail.test"),
                ("MAILSERVER_POP3_PORT", "2995"),
                ("MAILSERVER_SMTP_ADDRESS", "127.0.0.1"),
                ("MAILSERVER_SMTP_RECV_ENABLED", "true"),
                ("MAILSERVER_POP3_MAILDIR", "/srv/mail"),
            ]))
            .unwrap();

        assert_eq!(config.server.hostname, "mail.test");
        assert_eq!(config.pop3.listen_addr, "0.0.0.0:2995");
        assert_eq!(config.smtp.listen_addr, "127.0.0.1:465");
        assert!(config.smtp.relay_enabled);
        assert_eq!(config.pop3.maildir_path, "/srv/mail");
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = Config::default();
        assert!(config
            .apply_env(env(&[("MAILSERVER_SMTP_PORT", "smtps")]))
            .is_err());

        let mut config = Config::default();
        assert!(config
            .apply_env(env(&[("MAILSERVER_SMTP_RECV_ENABLED", "maybe")]))
            .is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let toml = toml::to_string(&Config::default()).unwrap();
        let toml = toml.replace("hostname = \"localhost\"", "hostname = \"from-file\"");
        file.write_all(toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.hostname, "from-file");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load(Some("/nonexistent/testmail.toml")).is_err());
    }
}
