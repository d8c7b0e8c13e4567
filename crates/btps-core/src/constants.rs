//! ─── BTPS Protocol Constants ────────────────────────────────────────────────
//!
//! Wire-visible defaults shared by the server, the client, and the
//! authentication service. Changing any of these is a protocol decision,
//! not a tuning knob.

// ── Wire ─────────────────────────────────────────────────────────────────────

/// Protocol version carried in every artifact and response.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default TLS port for BTPS inboxes.
pub const DEFAULT_PORT: u16 = 3443;

/// Per-connection idle timeout in milliseconds.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 30_000;

/// Maximum accepted line length in bytes. Oversized frames are rejected
/// before JSON parsing.
pub const MAX_LINE_BYTES: usize = 1_048_576;

// ── DNS ──────────────────────────────────────────────────────────────────────

/// TXT record prefix for host discovery: `_btps.<domain>`.
pub const DNS_HOST_PREFIX: &str = "_btps";

/// TXT record infix for key discovery: `<selector>._btp.<username>.<domain>`.
pub const DNS_KEY_INFIX: &str = "_btp";

/// Required `v=` token in both TXT record kinds.
pub const DNS_RECORD_VERSION: &str = "BTP1";

// ── Authentication ───────────────────────────────────────────────────────────

/// Short-lived auth token time-to-live: 15 minutes.
pub const AUTH_TOKEN_TTL_MS: u64 = 15 * 60 * 1000;

/// Refresh token time-to-live: 7 days.
pub const REFRESH_TOKEN_TTL_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default generated auth-token length in characters.
pub const AUTH_TOKEN_LENGTH: usize = 12;

/// Default refresh-token entropy in bytes (base64url-encoded on issue).
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Prefix for minted agent ids: `btps_ag_<uuidv4>`.
pub const AGENT_ID_PREFIX: &str = "btps_ag_";
