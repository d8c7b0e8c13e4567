//! Shared rate counters.
//!
//! Fixed-window counters keyed by opaque strings (`ip:<addr>`,
//! `id:<identity>`). Buckets whose window has long passed are swept on a
//! timer so the map does not grow with one-shot senders.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::RateLimitConfig;

struct Bucket {
    count: u32,
    window_start: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, buckets: Mutex::new(HashMap::new()) }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request against `key`; false means the caller is over its
    /// budget for the current window.
    pub fn check(&self, key: &str, max_per_window: u32) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = buckets
            .entry(key.to_string())
            .or_insert(Bucket { count: 0, window_start: now });
        if now.duration_since(bucket.window_start) >= self.config.window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        bucket.count += 1;
        bucket.count <= max_per_window
    }

    /// Drop buckets idle for more than one full window.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let window = self.config.window;
        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let before = buckets.len();
        buckets.retain(|_, b| now.duration_since(b.window_start) < window * 2);
        before - buckets.len()
    }

    /// Spawn the periodic sweep task.
    pub fn start_sweeper(self: &std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        let limiter = std::sync::Arc::clone(self);
        let interval = limiter.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = limiter.sweep();
                if dropped > 0 {
                    tracing::debug!(dropped, "rate limiter swept stale buckets");
                }
            }
        })
    }
}
