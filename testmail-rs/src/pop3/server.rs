use crate::config::Config;
use crate::error::Result;
use crate::pop3::session::Pop3Session;
use crate::security::TlsConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

pub struct Pop3Server {
    config: Arc<Config>,
}

impl Pop3Server {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Load TLS credentials, bind, and serve forever.
    pub async fn run(&self) -> Result<()> {
        let tls = TlsConfig::from_pem_files(
            &self.config.pop3.tls_cert_path,
            &self.config.pop3.tls_key_path,
        )?;
        let listener = TcpListener::bind(&self.config.pop3.listen_addr).await?;
        info!("POP3 server listening on {}", self.config.pop3.listen_addr);

        self.serve(listener, tls.acceptor()).await
    }

    /// Accept loop. Each connection gets its own task and session; a failed
    /// handshake or session only affects that connection.
    pub async fn serve(&self, listener: TcpListener, acceptor: TlsAcceptor) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New POP3 connection from {}", addr);

                    let acceptor = acceptor.clone();
                    let session = Pop3Session::new(
                        self.config.server.hostname.clone(),
                        PathBuf::from(&self.config.pop3.maildir_path),
                    );

                    tokio::spawn(async move {
                        let stream = match acceptor.accept(socket).await {
                            Ok(stream) => stream,
                            Err(e) => {
                                warn!("TLS handshake with {} failed: {}", addr, e);
                                return;
                            }
                        };
                        if let Err(e) = session.handle(stream).await {
                            error!("POP3 session error: {}", e);
                        }
                        info!("POP3 connection from {} closed", addr);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}
