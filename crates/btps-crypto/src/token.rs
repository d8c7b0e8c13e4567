//! Auth-token, refresh-token, and agent-id generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use uuid::Uuid;

use btps_core::constants::{AGENT_ID_PREFIX, AUTH_TOKEN_LENGTH, REFRESH_TOKEN_BYTES};

/// URL-safe alphabet for short-lived auth tokens. Ambiguous characters are
/// kept out so tokens survive being read over the phone.
pub const AUTH_TOKEN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a uniformly random auth token of `length` characters over
/// `alphabet`.
pub fn generate_auth_token_with(length: usize, alphabet: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

/// Generate an auth token with the default length and alphabet.
pub fn generate_auth_token() -> String {
    generate_auth_token_with(AUTH_TOKEN_LENGTH, AUTH_TOKEN_ALPHABET)
}

/// Generate a refresh token: base64url of `size` random bytes.
pub fn generate_refresh_token(size: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut bytes = vec![0u8; size.max(1)];
    rng.fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a refresh token with the default entropy.
pub fn generate_default_refresh_token() -> String {
    generate_refresh_token(REFRESH_TOKEN_BYTES)
}

/// Mint an agent id: `btps_ag_<uuidv4>`.
pub fn generate_agent_id() -> String {
    format!("{AGENT_ID_PREFIX}{}", Uuid::new_v4())
}
