use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ── Status / privacy ─────────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    Pending,
    Accepted,
    Rejected,
    Revoked,
    Blocked,
}

/// How documents under this trust must travel.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyType {
    Unencrypted,
    Encrypted,
    Mixed,
}

// ── Record ───────────────────────────────────────────────────────────────────

/// One rotation step of the counterparty's key.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyHistoryEntry {
    pub fingerprint: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A persistent row authorizing `sender_id` to deliver to `receiver_id`.
///
/// For agent trust the sender is an agent id (`btps_ag_…`) and the receiver
/// is the user identity the agent acts for; both are therefore plain strings
/// rather than `Identity` values.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
    /// Deterministic: [`trust_id`] of `(sender_id, receiver_id)`.
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: TrustStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// PEM (SPKI) public key of the sender at trust time.
    pub public_key_pem: String,
    /// base64(SHA-256(SPKI DER)) of `public_key_pem`.
    pub public_key_fingerprint: String,
    /// Prior fingerprints, appended on every key rotation.
    pub key_history: Vec<KeyHistoryEntry>,
    pub privacy_type: PrivacyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TrustRecord {
    /// Active means accepted and not expired.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == TrustStatus::Accepted
            && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }

    /// Rotate the stored sender key, pushing the old fingerprint onto the
    /// history.
    pub fn rotate_key(&mut self, new_pem: String, new_fingerprint: String, now: DateTime<Utc>) {
        if let Some(last) = self
            .key_history
            .iter_mut()
            .find(|e| e.fingerprint == self.public_key_fingerprint)
        {
            last.last_seen = now;
        } else {
            self.key_history.push(KeyHistoryEntry {
                fingerprint: self.public_key_fingerprint.clone(),
                first_seen: self.created_at,
                last_seen: now,
            });
        }
        self.public_key_pem = new_pem;
        self.public_key_fingerprint = new_fingerprint;
    }
}

/// Deterministic trust record id for the ordered `(sender, receiver)` pair.
pub fn trust_id(sender_id: &str, receiver_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender_id.as_bytes());
    hasher.update(b":");
    hasher.update(receiver_id.as_bytes());
    hex::encode(hasher.finalize())
}
