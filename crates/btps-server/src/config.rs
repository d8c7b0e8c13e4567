use std::time::Duration;

use btps_core::constants::{DEFAULT_PORT, DEFAULT_SOCKET_TIMEOUT_MS, MAX_LINE_BYTES};

/// Configuration for the BTPS inbox server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address, e.g. "0.0.0.0:3443".
    pub listen_addr: String,
    /// Per-connection idle timeout.
    pub socket_timeout: Duration,
    /// Per-request pipeline deadline. Defaults to the socket timeout.
    pub request_deadline: Duration,
    /// Longest accepted request line in bytes.
    pub max_line_bytes: usize,
    /// How long `stop()` waits for in-flight pipelines before force-closing.
    pub drain_timeout: Duration,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            socket_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            request_deadline: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            max_line_bytes: MAX_LINE_BYTES,
            drain_timeout: Duration::from_secs(5),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Shared counter settings for the default rate-limit middleware.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per window per IP address.
    pub max_per_ip: u32,
    /// Requests allowed per window per sender identity.
    pub max_per_identity: u32,
    pub window: Duration,
    /// How often stale buckets are swept.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_ip: 100,
            max_per_identity: 60,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
        }
    }
}
