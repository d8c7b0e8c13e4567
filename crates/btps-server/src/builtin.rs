//! Default middleware shipped with the server.
//!
//! Two rate-limit gates over the shared counters: by source IP before
//! parsing, by sender identity after parsing. Both answer 429 without
//! proceeding when a caller is over budget.

use std::sync::Arc;

use async_trait::async_trait;

use btps_core::{BtpsError, ServerArtifact};

use crate::context::{ResponseCtx, StepContext};
use crate::middleware::{MiddlewareDef, MiddlewareHandler, Next, Phase, Step};
use crate::ratelimit::RateLimiter;

pub struct IpRateLimit {
    limiter: Arc<RateLimiter>,
}

#[async_trait]
impl MiddlewareHandler for IpRateLimit {
    async fn handle(
        &self,
        ctx: &StepContext,
        res: &ResponseCtx,
        next: &mut Next,
    ) -> Result<(), BtpsError> {
        if let StepContext::ParsingBefore { remote_addr: Some(addr), .. } = ctx {
            let max = self.limiter.config().max_per_ip;
            if !self.limiter.check(&format!("ip:{addr}"), max) {
                res.send_error(429, "Too many requests");
                return Ok(());
            }
        }
        next.proceed();
        Ok(())
    }
}

pub struct IdentityRateLimit {
    limiter: Arc<RateLimiter>,
}

fn sender_key(artifact: &ServerArtifact) -> Option<String> {
    match artifact {
        ServerArtifact::Transporter(t) => Some(format!("id:{}", t.from)),
        ServerArtifact::Agent(a) => Some(format!("id:{}", a.agent_id)),
        ServerArtifact::IdentityLookup(l) => Some(format!("id:{}", l.from)),
        // Control frames are connection plumbing, not sender traffic.
        ServerArtifact::Control(_) => None,
    }
}

#[async_trait]
impl MiddlewareHandler for IdentityRateLimit {
    async fn handle(
        &self,
        ctx: &StepContext,
        res: &ResponseCtx,
        next: &mut Next,
    ) -> Result<(), BtpsError> {
        if let StepContext::ParsingAfter { data, .. } = ctx {
            if let Some(key) = sender_key(data) {
                let max = self.limiter.config().max_per_identity;
                if !self.limiter.check(&key, max) {
                    res.send_error(429, "Too many requests");
                    return Ok(());
                }
            }
        }
        next.proceed();
        Ok(())
    }
}

/// The built-in definitions, run ahead of anything a host registers.
pub fn rate_limit_middleware(limiter: Arc<RateLimiter>) -> Vec<MiddlewareDef> {
    vec![
        MiddlewareDef {
            name: "builtin.rateLimit.ip".into(),
            phase: Phase::Before,
            step: Step::Parsing,
            priority: Some(0),
            enabled: true,
            handler: Arc::new(IpRateLimit { limiter: Arc::clone(&limiter) }),
        },
        MiddlewareDef {
            name: "builtin.rateLimit.identity".into(),
            phase: Phase::After,
            step: Step::Parsing,
            priority: Some(0),
            enabled: true,
            handler: Arc::new(IdentityRateLimit { limiter }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn tight_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_per_ip: 2,
            max_per_identity: 1,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
        }))
    }

    #[tokio::test]
    async fn ip_gate_answers_429_over_budget() {
        let limiter = tight_limiter();
        let gate = IpRateLimit { limiter };
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let ctx = StepContext::ParsingBefore { raw_packet: "{}".into(), remote_addr: Some(addr) };

        for _ in 0..2 {
            let res = ResponseCtx::new();
            let mut next = Next::new();
            gate.handle(&ctx, &res, &mut next).await.unwrap();
            assert!(!res.response_sent());
        }

        let res = ResponseCtx::new();
        let mut next = Next::new();
        gate.handle(&ctx, &res, &mut next).await.unwrap();
        assert!(res.response_sent());
        let response = res.take_response().unwrap();
        assert_eq!(response.status.code, 429);
    }
}
