//! STARTTLS support (C7).
//!
//! - TLS 1.2+ only, via rustls' safe defaults
//! - Certificate loading from PEM files
//! - Self-signed certificate generation (development/testing)

use crate::error::{Result, SmtpError};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Supplies the `TlsAcceptor` a session upgrades its stream with after
/// `STARTTLS`. A real deployment backs this with a loaded certificate and
/// key; a core without any configured certificate has no `TlsProvider` and
/// runs with `TlsMode::Disabled`.
#[cfg_attr(test, mockall::automock)]
pub trait TlsProvider: Send + Sync {
    fn acceptor(&self) -> tokio_rustls::TlsAcceptor;
}

/// Certificate/key pair loaded from PEM files, backing a rustls `TlsAcceptor`.
#[derive(Clone)]
pub struct RustlsTlsProvider {
    server_config: Arc<ServerConfig>,
}

impl RustlsTlsProvider {
    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        info!(path = ?cert_path.as_ref(), "loading TLS certificate");

        let cert_file = File::open(cert_path.as_ref())
            .map_err(|e| SmtpError::Config(format!("failed to open certificate file: {e}")))?;
        let mut cert_reader = BufReader::new(cert_file);

        let certs = certs(&mut cert_reader)
            .map_err(|e| SmtpError::Config(format!("failed to read certificates: {e}")))?;

        if certs.is_empty() {
            return Err(SmtpError::Config("no certificates found in file".to_string()));
        }
        debug!(count = certs.len(), "loaded certificate chain");

        let key_file = File::open(key_path.as_ref())
            .map_err(|e| SmtpError::Config(format!("failed to open key file: {e}")))?;
        let mut key_reader = BufReader::new(key_file);

        let mut keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|e| SmtpError::Config(format!("failed to read private keys: {e}")))?;

        if keys.is_empty() {
            return Err(SmtpError::Config("no private key found in file".to_string()));
        }
        let private_key = keys.remove(0);

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                certs.into_iter().map(rustls::Certificate).collect(),
                rustls::PrivateKey(private_key),
            )
            .map_err(|e| SmtpError::Config(format!("failed to build TLS config: {e}")))?;

        Ok(Self {
            server_config: Arc::new(config),
        })
    }
}

impl TlsProvider for RustlsTlsProvider {
    fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.server_config.clone())
    }
}

/// Generate a self-signed certificate for development/testing.
///
/// **WARNING**: not suitable for production use.
pub fn generate_self_signed_cert(domain: &str, cert_output: &str, key_output: &str) -> Result<()> {
    use rcgen::{CertificateParams, DistinguishedName};

    info!(domain, "generating self-signed certificate");

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.subject_alt_names = vec![
        rcgen::SanType::DnsName(domain.to_string()),
        rcgen::SanType::DnsName(format!("*.{domain}")),
    ];

    let cert = rcgen::Certificate::from_params(params)
        .map_err(|e| SmtpError::Config(format!("failed to generate certificate: {e}")))?;

    std::fs::write(
        cert_output,
        cert.serialize_pem()
            .map_err(|e| SmtpError::Config(format!("failed to serialize certificate: {e}")))?,
    )
    .map_err(|e| SmtpError::Config(format!("failed to write certificate: {e}")))?;

    std::fs::write(key_output, cert.serialize_private_key_pem())
        .map_err(|e| SmtpError::Config(format!("failed to write private key: {e}")))?;

    Ok(())
}
