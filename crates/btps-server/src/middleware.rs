//! Middleware manager.
//!
//! Handlers attach to a `(phase, step)` slot, run in ascending priority
//! order, and either call `next.proceed()` or answer through the
//! [`ResponseCtx`] without proceeding. Once a response is sent no further
//! middleware runs, in this step or any later one. Lifecycle hooks observe
//! server start/stop and every response written.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use btps_core::{BtpsError, BtpsResponse};

use crate::context::{ResponseCtx, StepContext};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Phase {
    Before,
    After,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Step {
    Parsing,
    SignatureVerification,
    TrustVerification,
    OnArtifact,
    OnError,
}

/// Continuation flag. A handler that never calls [`Next::proceed`] stops the
/// chain for its slot.
pub struct Next {
    proceed: bool,
}

impl Next {
    pub(crate) fn new() -> Self {
        Self { proceed: false }
    }

    pub fn proceed(&mut self) {
        self.proceed = true;
    }
}

#[async_trait]
pub trait MiddlewareHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &StepContext,
        res: &ResponseCtx,
        next: &mut Next,
    ) -> Result<(), BtpsError>;
}

/// Hooks outside the per-request chain.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_server_start(&self) {}
    async fn on_server_stop(&self) {}
    async fn on_response_sent(&self, _response: &BtpsResponse) {}
}

/// One middleware definition as loaded from a host's middleware module.
pub struct MiddlewareDef {
    pub name: String,
    pub phase: Phase,
    pub step: Step,
    /// Ascending execution order; missing sorts last.
    pub priority: Option<i64>,
    pub enabled: bool,
    pub handler: Arc<dyn MiddlewareHandler>,
}

struct Registered {
    name: String,
    priority: i64,
    handler: Arc<dyn MiddlewareHandler>,
}

/// Everything a middleware factory may depend on.
pub struct MiddlewareDeps {
    pub trust_store: Arc<dyn btps_store::TrustStore>,
    pub token_store: Arc<dyn btps_store::TokenStore>,
    pub rate_limiter: Arc<crate::ratelimit::RateLimiter>,
}

#[derive(Default)]
pub struct MiddlewareManager {
    chains: HashMap<(Phase, Step), Vec<Registered>>,
    lifecycle: Vec<Arc<dyn LifecycleHooks>>,
}

impl MiddlewareManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register definitions. Disabled entries are omitted;
    /// negative priorities are configuration errors.
    pub fn register(&mut self, defs: Vec<MiddlewareDef>) -> Result<(), BtpsError> {
        for def in defs {
            if let Some(priority) = def.priority {
                if priority < 0 {
                    return Err(BtpsError::InvalidConfig(format!(
                        "middleware '{}' has negative priority {priority}",
                        def.name
                    )));
                }
            }
            if !def.enabled {
                continue;
            }
            self.chains.entry((def.phase, def.step)).or_default().push(Registered {
                name: def.name,
                priority: def.priority.unwrap_or(i64::MAX),
                handler: def.handler,
            });
        }
        for chain in self.chains.values_mut() {
            chain.sort_by_key(|m| m.priority);
        }
        Ok(())
    }

    /// Build definitions from a factory with injected dependencies, then
    /// register them.
    pub fn load_with<F>(&mut self, deps: &MiddlewareDeps, factory: F) -> Result<(), BtpsError>
    where
        F: FnOnce(&MiddlewareDeps) -> Vec<MiddlewareDef>,
    {
        self.register(factory(deps))
    }

    pub fn add_lifecycle(&mut self, hooks: Arc<dyn LifecycleHooks>) {
        self.lifecycle.push(hooks);
    }

    /// Run the chain for `(phase, step)`. Stops as soon as a handler
    /// responds, or declines to proceed. Typed errors propagate to the
    /// pipeline's error path.
    pub async fn run(
        &self,
        phase: Phase,
        step: Step,
        ctx: &StepContext,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        let Some(chain) = self.chains.get(&(phase, step)) else {
            return Ok(());
        };
        for middleware in chain {
            if res.response_sent() {
                break;
            }
            let mut next = Next::new();
            if let Err(e) = middleware.handler.handle(ctx, res, &mut next).await {
                warn!(middleware = %middleware.name, error = %e, "middleware failed");
                return Err(e);
            }
            if !next.proceed {
                break;
            }
        }
        Ok(())
    }

    pub async fn notify_server_start(&self) {
        for hooks in &self.lifecycle {
            hooks.on_server_start().await;
        }
    }

    pub async fn notify_server_stop(&self) {
        for hooks in &self.lifecycle {
            hooks.on_server_stop().await;
        }
    }

    pub async fn notify_response_sent(&self, response: &BtpsResponse) {
        for hooks in &self.lifecycle {
            hooks.on_response_sent(response).await;
        }
    }
}
