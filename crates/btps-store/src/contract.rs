use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use btps_core::trust::{KeyHistoryEntry, PrivacyType, TrustStatus};
use btps_core::{BtpsError, TokenRecord, TrustRecord};

/// Partial update applied atomically to a trust record. Fields left `None`
/// keep their stored value.
#[derive(Clone, Debug, Default)]
pub struct TrustPatch {
    pub status: Option<TrustStatus>,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub public_key_pem: Option<String>,
    pub public_key_fingerprint: Option<String>,
    pub key_history: Option<Vec<KeyHistoryEntry>>,
    pub privacy_type: Option<PrivacyType>,
    pub metadata: Option<Option<Value>>,
}

impl TrustPatch {
    pub fn apply(self, record: &mut TrustRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(decided_by) = self.decided_by {
            record.decided_by = Some(decided_by);
        }
        if let Some(decided_at) = self.decided_at {
            record.decided_at = Some(decided_at);
        }
        if let Some(expires_at) = self.expires_at {
            record.expires_at = expires_at;
        }
        if let Some(pem) = self.public_key_pem {
            record.public_key_pem = pem;
        }
        if let Some(fp) = self.public_key_fingerprint {
            record.public_key_fingerprint = fp;
        }
        if let Some(history) = self.key_history {
            record.key_history = history;
        }
        if let Some(privacy) = self.privacy_type {
            record.privacy_type = privacy;
        }
        if let Some(metadata) = self.metadata {
            record.metadata = metadata;
        }
    }
}

/// Durable mapping keyed by the deterministic trust id.
///
/// Implementations guarantee unique ids, atomic patch merges, and
/// read-your-writes within a process.
#[async_trait]
pub trait TrustStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<TrustRecord>, BtpsError>;

    /// Insert a new record. Fails with `INVALID_CONFIG` when the id exists.
    async fn create(&self, record: TrustRecord) -> Result<TrustRecord, BtpsError>;

    /// Merge `patch` into the stored record and return the result.
    async fn update(&self, id: &str, patch: TrustPatch) -> Result<TrustRecord, BtpsError>;

    async fn delete(&self, id: &str) -> Result<(), BtpsError>;

    /// All records, optionally narrowed to one receiver.
    async fn get_all(&self, receiver_id: Option<&str>) -> Result<Vec<TrustRecord>, BtpsError>;
}

/// Short-lived auth tokens and refresh tokens, keyed by `(holder, token)`.
///
/// Expired tokens are never returned by `get`, even before a sweep removes
/// them. A secondary index by user identity serves enumeration and mass
/// revocation.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn store(&self, record: TokenRecord) -> Result<(), BtpsError>;

    async fn get(&self, holder: &str, token: &str) -> Result<Option<TokenRecord>, BtpsError>;

    async fn remove(&self, holder: &str, token: &str) -> Result<(), BtpsError>;

    /// Sweep expired tokens; returns how many were removed.
    async fn cleanup(&self) -> Result<usize, BtpsError>;

    async fn tokens_by_user(&self, user_identity: &str) -> Result<Vec<TokenRecord>, BtpsError>;

    /// Remove every token for a user; returns how many were removed.
    async fn revoke_all_for_user(&self, user_identity: &str) -> Result<usize, BtpsError>;
}
