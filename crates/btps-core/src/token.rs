use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A short-lived auth token or a refresh token, keyed by `(holder, token)`.
///
/// `holder` is the agent id for refresh tokens and the user identity itself
/// for the one-shot auth tokens handed out before an agent exists.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub token: String,
    pub holder: String,
    pub user_identity: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Identity whose key decrypts any 2fa-wrapped material bound to this
    /// token.
    pub decrypt_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TokenRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
