//! TLS material loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;

use btps_core::BtpsError;

/// Build a rustls server config from PEM cert-chain and key files.
pub fn tls_config_from_pem_files(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<Arc<RustlsServerConfig>, BtpsError> {
    let mut cert_reader = BufReader::new(File::open(cert_path.as_ref()).map_err(|e| {
        BtpsError::InvalidConfig(format!("opening {}: {e}", cert_path.as_ref().display()))
    })?);
    let mut key_reader = BufReader::new(File::open(key_path.as_ref()).map_err(|e| {
        BtpsError::InvalidConfig(format!("opening {}: {e}", key_path.as_ref().display()))
    })?);
    build(
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>(),
        rustls_pemfile::private_key(&mut key_reader),
    )
}

/// Build a rustls server config from in-memory PEM strings.
pub fn tls_config_from_pem(
    cert_pem: &str,
    key_pem: &str,
) -> Result<Arc<RustlsServerConfig>, BtpsError> {
    build(
        rustls_pemfile::certs(&mut cert_pem.as_bytes()).collect::<Result<Vec<_>, _>>(),
        rustls_pemfile::private_key(&mut key_pem.as_bytes()),
    )
}

fn build(
    certs: std::io::Result<Vec<CertificateDer<'static>>>,
    key: std::io::Result<Option<PrivateKeyDer<'static>>>,
) -> Result<Arc<RustlsServerConfig>, BtpsError> {
    let certs = certs.map_err(|e| BtpsError::InvalidConfig(format!("reading certificates: {e}")))?;
    if certs.is_empty() {
        return Err(BtpsError::InvalidConfig("no certificates in PEM input".into()));
    }
    let key = key
        .map_err(|e| BtpsError::InvalidConfig(format!("reading private key: {e}")))?
        .ok_or_else(|| BtpsError::InvalidConfig("no private key in PEM input".into()))?;
    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BtpsError::InvalidConfig(format!("building TLS config: {e}")))?;
    Ok(Arc::new(config))
}
