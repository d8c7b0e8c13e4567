use thiserror::Error;

/// The closed BTPS error sum. Every variant carries a stable string code
/// (see [`BtpsError::code`]) that survives onto the wire in `btps_error`
/// responses, plus a human-readable message.
#[derive(Debug, Error)]
pub enum BtpsError {
    // ── Parsing / validation ─────────────────────────────────────────────────
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("artifact validation failed: {0}")]
    Validation(String),

    #[error("invalid identity: {0}")]
    Identity(String),

    // ── Identity / key resolution ────────────────────────────────────────────
    #[error("DNS resolution failed for {0}")]
    ResolveDns(String),

    #[error("malformed public key record for {0}")]
    ResolvePubkey(String),

    #[error("selector '{selector}' not found for {identity}")]
    SelectorNotFound { identity: String, selector: String },

    // ── Signatures ───────────────────────────────────────────────────────────
    #[error("signature fingerprint does not match the resolved key")]
    SigMismatch,

    #[error("signature verification failed: {0}")]
    SigVerification(String),

    #[error("delegation signature verification failed: {0}")]
    DelegationSigVerification(String),

    #[error("invalid delegation: {0}")]
    DelegationInvalid(String),

    #[error("attestation verification failed: {0}")]
    AttestationVerification(String),

    // ── Encryption ───────────────────────────────────────────────────────────
    #[error("unsupported encryption: {0}")]
    UnsupportedEncrypt(String),

    #[error("document was not encrypted to this recipient")]
    DecryptionUnintended,

    // ── Trust ────────────────────────────────────────────────────────────────
    #[error("trust record does not exist between {sender} and {receiver}")]
    TrustNonExistent { sender: String, receiver: String },

    #[error("an active trust record already exists between {sender} and {receiver}")]
    TrustAlreadyActive { sender: String, receiver: String },

    #[error("trust between {sender} and {receiver} is blocked")]
    TrustBlocked { sender: String, receiver: String },

    #[error("operation not allowed by the trust record: {0}")]
    TrustNotAllowed(String),

    // ── Authentication ───────────────────────────────────────────────────────
    #[error("authentication failed: {0}")]
    AuthenticationInvalid(String),

    // ── Transport ────────────────────────────────────────────────────────────
    #[error("rate limit exceeded: {0}")]
    RateLimiter(String),

    #[error("socket timed out after {0} ms")]
    SocketTimeout(u64),

    #[error("socket closed before a response could be written")]
    SocketClosed,

    // ── Configuration / storage ──────────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────────
    #[error("{0}")]
    Unknown(String),
}

impl BtpsError {
    /// The stable wire-level error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "INVALID_JSON",
            Self::Validation(_) => "VALIDATION",
            Self::Identity(_) => "IDENTITY",
            Self::ResolveDns(_) => "RESOLVE_DNS",
            Self::ResolvePubkey(_) => "RESOLVE_PUBKEY",
            Self::SelectorNotFound { .. } => "SELECTOR_NOT_FOUND",
            Self::SigMismatch => "SIG_MISMATCH",
            Self::SigVerification(_) => "SIG_VERIFICATION",
            Self::DelegationSigVerification(_) => "DELEGATION_SIG_VERIFICATION",
            Self::DelegationInvalid(_) => "DELEGATION_INVALID",
            Self::AttestationVerification(_) => "ATTESTATION_VERIFICATION",
            Self::UnsupportedEncrypt(_) => "UNSUPPORTED_ENCRYPT",
            Self::DecryptionUnintended => "DECRYPTION_UNINTENDED",
            Self::TrustNonExistent { .. } => "TRUST_NON_EXISTENT",
            Self::TrustAlreadyActive { .. } => "TRUST_ALREADY_ACTIVE",
            Self::TrustBlocked { .. } => "TRUST_BLOCKED",
            Self::TrustNotAllowed(_) => "TRUST_NOT_ALLOWED",
            Self::AuthenticationInvalid(_) => "AUTHENTICATION_INVALID",
            Self::RateLimiter(_) => "RATE_LIMITER",
            Self::SocketTimeout(_) => "SOCKET_TIMEOUT",
            Self::SocketClosed => "SOCKET_CLOSED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// HTTP-style numeric status for `btps_error` responses.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidJson(_)
            | Self::Validation(_)
            | Self::Identity(_)
            | Self::UnsupportedEncrypt(_) => 400,
            Self::SigMismatch
            | Self::SigVerification(_)
            | Self::DelegationSigVerification(_)
            | Self::DelegationInvalid(_)
            | Self::AttestationVerification(_)
            | Self::DecryptionUnintended
            | Self::TrustNonExistent { .. }
            | Self::TrustAlreadyActive { .. }
            | Self::TrustBlocked { .. }
            | Self::TrustNotAllowed(_)
            | Self::AuthenticationInvalid(_) => 403,
            Self::SocketTimeout(_) => 408,
            Self::RateLimiter(_) => 429,
            Self::ResolveDns(_)
            | Self::ResolvePubkey(_)
            | Self::SelectorNotFound { .. }
            | Self::SocketClosed
            | Self::InvalidConfig(_)
            | Self::Unknown(_) => 500,
        }
    }
}
