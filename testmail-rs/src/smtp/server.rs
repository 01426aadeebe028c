use crate::config::Config;
use crate::error::Result;
use crate::security::TlsConfig;
use crate::smtp::client::SmtpRelay;
use crate::smtp::relay::Delivery;
use crate::smtp::session::SmtpSession;
use crate::storage::Spool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

pub struct SmtpServer {
    config: Arc<Config>,
    delivery: Arc<Delivery>,
}

impl SmtpServer {
    pub fn new(config: Arc<Config>) -> Self {
        let mut delivery = Delivery::new(Spool::new(&config.smtp.receive_dir));
        if config.smtp.relay_enabled {
            info!("Relaying accepted mail to {}", config.smtp.relay_addr);
            delivery = delivery.with_relay(
                Arc::new(SmtpRelay::new(config.smtp.relay_addr.clone())),
                config.smtp.forward_credentials,
            );
        }
        Self::with_delivery(config, Arc::new(delivery))
    }

    /// Use a custom delivery pipeline
    pub fn with_delivery(config: Arc<Config>, delivery: Arc<Delivery>) -> Self {
        Self { config, delivery }
    }

    pub async fn run(&self) -> Result<()> {
        let tls = TlsConfig::from_pem_files(
            &self.config.smtp.tls_cert_path,
            &self.config.smtp.tls_key_path,
        )?;
        let listener = TcpListener::bind(&self.config.smtp.listen_addr).await?;
        info!("SMTP server listening on {}", self.config.smtp.listen_addr);

        self.serve(listener, tls.acceptor()).await
    }

    pub async fn serve(&self, listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New SMTP connection from {}", addr);

                    let acceptor = acceptor.clone();
                    let session = SmtpSession::new(
                        self.config.server.hostname.clone(),
                        self.config.smtp.max_message_size,
                        self.delivery.clone(),
                    )
                    .with_credential_logging(self.config.logging.log_credentials);

                    tokio::spawn(async move {
                        let stream = match acceptor.accept(socket).await {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!("TLS handshake with {} failed: {}", addr, e);
                                return;
                            }
                        };
                        if let Err(e) = session.handle(stream).await {
                            error!("Session error: {}", e);
                        }
                        info!("SMTP connection from {} closed", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
