use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use testmail_rs::config::Config;
use testmail_rs::pop3::Pop3Server;
use testmail_rs::security::tls::generate_self_signed_cert;
use testmail_rs::logging;
use testmail_rs::smtp::SmtpServer;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "testmail")]
#[command(about = "POP3/SMTP test mail servers", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the mailbox directory over POP3
    Pop3,
    /// Accept mail over SMTP
    Smtp,
    /// Write a self-signed certificate and key
    GenCert {
        #[arg(short, long, default_value = "localhost")]
        domain: String,
        #[arg(long, default_value = "tls.crt")]
        cert: PathBuf,
        #[arg(long, default_value = "tls.key")]
        key: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref())?;
    logging::init(&config.logging)?;

    if config.logging.log_credentials {
        info!("Plaintext credential logging is enabled");
    }

    let config = Arc::new(config);

    let result = match cli.command {
        Commands::Pop3 => {
            info!("  Maildir path: {}", config.pop3.maildir_path);
            Pop3Server::new(config).run().await
        }
        Commands::Smtp => {
            info!("  Receive directory: {}", config.smtp.receive_dir);
            SmtpServer::new(config).run().await
        }
        Commands::GenCert { domain, cert, key } => {
            generate_self_signed_cert(&domain, &cert, &key)?;
            info!(
                "Wrote certificate for {} to {} and {}",
                domain,
                cert.display(),
                key.display()
            );
            return Ok(());
        }
    };

    // The servers only return on startup failure
    if let Err(e) = result {
        error!("Listen failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
