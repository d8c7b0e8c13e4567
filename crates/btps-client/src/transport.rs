//! The TLS line transport.
//!
//! One request, one response: connect, write a newline-terminated canonical
//! JSON frame, read the single response line, and let the server close.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use btps_core::{BtpsError, BtpsResponse};
use btps_crypto::to_canonical_json;

/// Client-side trust anchors.
pub struct ClientTls {
    roots: RootCertStore,
}

impl ClientTls {
    pub fn new() -> Self {
        Self { roots: RootCertStore::empty() }
    }

    /// Add PEM certificates to the root store (deployment CA, or the host
    /// certificate itself for self-signed setups).
    pub fn with_root_pem(mut self, pem: &str) -> Result<Self, BtpsError> {
        let certs = rustls_pemfile::certs(&mut pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BtpsError::InvalidConfig(format!("reading root PEM: {e}")))?;
        for cert in certs {
            self.roots
                .add(cert)
                .map_err(|e| BtpsError::InvalidConfig(format!("adding root: {e}")))?;
        }
        Ok(self)
    }

    fn into_config(self) -> ClientConfig {
        ClientConfig::builder().with_root_certificates(self.roots).with_no_client_auth()
    }
}

impl Default for ClientTls {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Transport {
    connector: TlsConnector,
}

impl Transport {
    pub fn new(tls: ClientTls) -> Self {
        Self { connector: TlsConnector::from(Arc::new(tls.into_config())) }
    }

    /// Send one JSON frame and read the single response line.
    pub async fn send_json(
        &self,
        host: &str,
        port: u16,
        value: &Value,
    ) -> Result<BtpsResponse, BtpsError> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| BtpsError::Unknown(format!("connecting {host}:{port}: {e}")))?;
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| BtpsError::InvalidConfig(format!("invalid server name {host}: {e}")))?;
        let stream = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| BtpsError::Unknown(format!("TLS handshake with {host}: {e}")))?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut frame = to_canonical_json(value);
        frame.push('\n');
        write_half
            .write_all(frame.as_bytes())
            .await
            .map_err(|_| BtpsError::SocketClosed)?;
        write_half.flush().await.map_err(|_| BtpsError::SocketClosed)?;
        debug!(host, port, bytes = frame.len(), "artifact sent");

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        let read = reader.read_line(&mut line).await.map_err(|_| BtpsError::SocketClosed)?;
        if read == 0 {
            return Err(BtpsError::SocketClosed);
        }
        serde_json::from_str(line.trim())
            .map_err(|e| BtpsError::InvalidJson(format!("malformed response: {e}")))
    }

    /// Serialize and send any wire-shaped artifact.
    pub async fn send_artifact<T: serde::Serialize>(
        &self,
        host: &str,
        port: u16,
        artifact: &T,
    ) -> Result<BtpsResponse, BtpsError> {
        let value = serde_json::to_value(artifact)
            .map_err(|e| BtpsError::Validation(e.to_string()))?;
        self.send_json(host, port, &value).await
    }
}
