//! The TLS acceptor and server lifecycle.
//!
//! One logical task per accepted connection; connections are independent and
//! per-connection work is serialized inside [`crate::connection`]. `stop()`
//! stops accepting, fires the stop hooks, closes idle sockets at once via
//! the shared shutdown signal, lets in-flight pipelines drain for a bounded
//! interval, then aborts stragglers.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use btps_auth::AuthService;
use btps_core::BtpsError;
use btps_resolver::KeyResolver;
use btps_store::{TokenStore, TrustStore};

use crate::builtin::rate_limit_middleware;
use crate::config::ServerConfig;
use crate::connection::serve_connection;
use crate::dispatch::{ArtifactHandler, Dispatcher};
use crate::middleware::MiddlewareManager;
use crate::pipeline::Pipeline;
use crate::ratelimit::RateLimiter;

/// Everything the server needs injected at construction.
pub struct ServerDeps {
    pub resolver: Arc<dyn KeyResolver>,
    pub trust_store: Arc<dyn TrustStore>,
    pub token_store: Arc<dyn TokenStore>,
    /// Enables `auth.*` actions when present.
    pub auth: Option<Arc<AuthService>>,
}

/// Handle returned from [`BtpsServer::bind`]; lives independently of the
/// running server task.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to stop accepting and drain.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Owns the listener. Pass to `tokio::spawn(server.run())`.
pub struct BtpsServer {
    config: ServerConfig,
    listener: TcpListener,
    acceptor: TlsAcceptor,
    pipeline: Arc<Pipeline>,
    rate_limiter: Arc<RateLimiter>,
    shutdown_rx: watch::Receiver<bool>,
}

impl BtpsServer {
    /// Bind the listener and assemble the pipeline. Custom middleware and
    /// lifecycle hooks ride in on `middleware`; the built-in rate-limit
    /// gates are prepended when enabled.
    pub async fn bind(
        config: ServerConfig,
        tls: Arc<RustlsServerConfig>,
        deps: ServerDeps,
        mut middleware: MiddlewareManager,
    ) -> Result<(Self, ServerHandle), BtpsError> {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        if config.rate_limit.enabled {
            middleware.register(rate_limit_middleware(Arc::clone(&rate_limiter)))?;
        }

        let dispatcher = Arc::new(Dispatcher::new(deps.auth));
        let pipeline = Arc::new(Pipeline::new(
            deps.resolver,
            deps.trust_store,
            Arc::new(middleware),
            dispatcher,
        ));

        let listener = TcpListener::bind(&config.listen_addr).await.map_err(|e| {
            BtpsError::InvalidConfig(format!("binding {}: {e}", config.listen_addr))
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            BtpsError::InvalidConfig(format!("reading local address: {e}"))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = Self {
            config,
            listener,
            acceptor: TlsAcceptor::from(tls),
            pipeline,
            rate_limiter,
            shutdown_rx,
        };
        Ok((server, ServerHandle { local_addr, shutdown_tx }))
    }

    /// The dispatcher, for registering `on_incoming_artifact` handlers and
    /// identity key records before (or after) `run`.
    pub fn on_incoming_artifact(&self, handler: Arc<dyn ArtifactHandler>) {
        self.pipeline.dispatcher().on_incoming_artifact(handler);
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.pipeline.dispatcher()
    }

    /// Accept until stopped. Run in a dedicated tokio task.
    pub async fn run(mut self) {
        info!(addr = %self.listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
              "BTPS server listening");
        self.pipeline.middleware().notify_server_start().await;
        let sweeper = self.rate_limiter.start_sweeper();
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                result = self.shutdown_rx.changed() => {
                    if result.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((tcp, remote_addr)) => {
                            let acceptor = self.acceptor.clone();
                            let pipeline = Arc::clone(&self.pipeline);
                            let config = self.config.clone();
                            let shutdown = self.shutdown_rx.clone();
                            connections.spawn(async move {
                                match acceptor.accept(tcp).await {
                                    Ok(tls) => {
                                        serve_connection(tls, remote_addr, pipeline, config, shutdown)
                                            .await
                                    }
                                    Err(e) => {
                                        debug!(%remote_addr, error = %e, "TLS handshake failed")
                                    }
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                // Reap finished connection tasks so the set stays small.
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(self.listener);
        self.pipeline.middleware().notify_server_stop().await;

        // Idle connections saw the shutdown signal and are closing on their
        // own; the bounded wait is for pipelines still mid-request.
        debug!(in_flight = connections.len(), "draining connections");
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = connections.len(), "drain timed out, aborting connections");
            connections.abort_all();
        }
        sweeper.abort();
        info!("BTPS server stopped");
    }
}
