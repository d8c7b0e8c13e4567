//! btps-server — the BTPS inbox server.
//!
//! A TLS listener framing newline-delimited canonical-JSON artifacts, the
//! verification pipeline (parse → attestation → delegation → signature →
//! trust → dispatch), a phase/step-scoped middleware manager, shared rate
//! counters, and the dispatcher that answers immediate actions.

pub mod builtin;
pub mod config;
pub mod connection;
pub mod context;
pub mod dispatch;
pub mod middleware;
pub mod pipeline;
pub mod ratelimit;
pub mod server;
pub mod tls;

pub use config::{RateLimitConfig, ServerConfig};
pub use context::{ResponseCtx, StepContext};
pub use dispatch::{ArtifactEvent, ArtifactHandler, Dispatcher};
pub use middleware::{
    LifecycleHooks, MiddlewareDef, MiddlewareDeps, MiddlewareHandler, MiddlewareManager, Next,
    Phase, Step,
};
pub use pipeline::Pipeline;
pub use ratelimit::RateLimiter;
pub use server::{BtpsServer, ServerDeps, ServerHandle};
pub use tls::{tls_config_from_pem, tls_config_from_pem_files};
