//! btps-node — the BTPS inbox server binary.
//!
//! Startup sequence:
//!   1. Load TLS material (PEM files, or base64 env vars)
//!   2. Open the JSON trust store
//!   3. Assemble the resolver, token store, and authentication service
//!   4. Bind the TLS listener and run until SIGINT

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use tracing::{info, warn};

use btps_auth::AuthService;
use btps_core::constants::DEFAULT_PORT;
use btps_resolver::DnsResolver;
use btps_server::{
    tls_config_from_pem, tls_config_from_pem_files, BtpsServer, MiddlewareManager, ServerConfig,
    ServerDeps,
};
use btps_store::{JsonStoreConfig, JsonTrustStore, MemoryTokenStore};

#[derive(Parser, Debug)]
#[command(
    name = "btps-node",
    version,
    about = "BTPS inbox server — signed business documents over federated TLS"
)]
struct Args {
    /// TLS listen port.
    #[arg(long, env = "BTPS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// PEM certificate chain path.
    #[arg(long, env = "BTPS_CERT_PATH")]
    cert_path: Option<PathBuf>,

    /// PEM private key path.
    #[arg(long, env = "BTPS_KEY_PATH")]
    key_path: Option<PathBuf>,

    /// Trust store JSON document path.
    #[arg(long, default_value = "~/.btps/trust.json")]
    trust_store: PathBuf,

    /// Per-connection idle timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    socket_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,btps=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();
    info!("BTPS node starting");

    // ── TLS material ──────────────────────────────────────────────────────────
    let tls = match (&args.cert_path, &args.key_path) {
        (Some(cert), Some(key)) => tls_config_from_pem_files(cert, key)
            .map_err(|e| anyhow::anyhow!("loading TLS material: {e}"))?,
        _ => {
            // Container-friendly fallback: base64 PEM in the environment.
            let cert = std::env::var("TLS_CERT")
                .context("no --cert-path and no TLS_CERT in the environment")?;
            let key = std::env::var("TLS_KEY")
                .context("no --key-path and no TLS_KEY in the environment")?;
            let cert = String::from_utf8(BASE64.decode(cert).context("decoding TLS_CERT")?)
                .context("TLS_CERT is not UTF-8 PEM")?;
            let key = String::from_utf8(BASE64.decode(key).context("decoding TLS_KEY")?)
                .context("TLS_KEY is not UTF-8 PEM")?;
            tls_config_from_pem(&cert, &key)
                .map_err(|e| anyhow::anyhow!("loading TLS material: {e}"))?
        }
    };

    // ── Trust store ───────────────────────────────────────────────────────────
    let trust_path = expand_tilde(&args.trust_store);
    if let Some(parent) = trust_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let trust_store = Arc::new(
        JsonTrustStore::open(JsonStoreConfig::new(&trust_path))
            .map_err(|e| anyhow::anyhow!("opening trust store: {e}"))?,
    );
    info!(path = %trust_path.display(), "trust store open");

    // ── Services ──────────────────────────────────────────────────────────────
    let token_store = Arc::new(MemoryTokenStore::new());
    let resolver = Arc::new(
        DnsResolver::from_system_conf().map_err(|e| anyhow::anyhow!("building resolver: {e}"))?,
    );
    let auth = Arc::new(AuthService::new(trust_store.clone(), token_store.clone()));

    let listen_addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.bind, args.port))?;
    let config = ServerConfig {
        listen_addr: listen_addr.to_string(),
        socket_timeout: Duration::from_millis(args.socket_timeout_ms),
        request_deadline: Duration::from_millis(args.socket_timeout_ms),
        ..ServerConfig::default()
    };

    let deps = ServerDeps {
        resolver,
        trust_store: trust_store.clone(),
        token_store,
        auth: Some(auth),
    };
    let (server, handle) =
        BtpsServer::bind(config, tls, deps, MiddlewareManager::new())
            .await
            .map_err(|e| anyhow::anyhow!("binding server: {e}"))?;

    let server_task = tokio::spawn(server.run());
    info!(addr = %handle.local_addr(), "node ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    handle.stop();
    if let Err(e) = server_task.await {
        warn!(error = %e, "server task ended abnormally");
    }

    // Dropping the store flushes any pending writes synchronously.
    if let Err(e) = trust_store.flush() {
        warn!(error = %e, "final trust store flush failed");
    }
    info!("BTPS node stopped");
    Ok(())
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
