use clap::Parser;
use mail_rs::config::{LogFormat, ServerConfig, TlsMode};
use mail_rs::security::{RustlsTlsProvider, SqliteUserStore, TlsProvider};
use mail_rs::sink::MaildirSink;
use mail_rs::smtp::SmtpServer;
use mail_rs::clock::SystemClock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-rs")]
#[command(about = "An ESMTP receiver", long_about = None)]
struct Cli {
    /// Path to a TOML config file; falls back to built-in defaults if absent.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Where to store received mail (Maildir layout).
    #[arg(long, default_value = "./maildir")]
    maildir: PathBuf,

    /// SQLite database URL for the AUTH user store. Omit to run with AUTH disabled.
    #[arg(long)]
    user_db: Option<String>,

    /// PEM certificate for STARTTLS. Requires --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for STARTTLS. Requires --tls-cert.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        ServerConfig::from_file(&cli.config)?
    } else {
        ServerConfig::default()
    };

    init_logging(&config.logging);
    info!(hostname = %config.hostname, listen_addrs = ?config.listen_addrs, "starting mail-rs");

    let user_store = match &cli.user_db {
        Some(url) => {
            info!(url, "AUTH enabled, connecting to user store");
            Some(Arc::new(SqliteUserStore::connect(url).await?) as Arc<dyn mail_rs::security::UserStore>)
        }
        None => {
            if config.auth_required {
                return Err("auth_required is set but no --user-db was provided".into());
            }
            None
        }
    };

    let tls_provider = match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => {
            let provider = RustlsTlsProvider::from_pem_files(cert, key)?;
            Some(Arc::new(provider) as Arc<dyn TlsProvider>)
        }
        _ => {
            if config.tls_mode != TlsMode::Disabled {
                return Err("tls_mode is not disabled but no --tls-cert/--tls-key were provided".into());
            }
            None
        }
    };

    std::fs::create_dir_all(&cli.maildir)?;
    let sink = Arc::new(MaildirSink::new(cli.maildir.clone()));

    let config = Arc::new(config);
    let server = SmtpServer::new(config, user_store, tls_provider, sink, Arc::new(SystemClock));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    info!("server stopped");
    Ok(())
}

fn init_logging(cfg: &mail_rs::config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match cfg.format {
        LogFormat::Pretty => subscriber.pretty().init(),
        LogFormat::Json => subscriber.json().init(),
    }
}
