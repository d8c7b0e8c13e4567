//! btps-auth — agent session issuance and refresh.
//!
//! Issues short-lived auth tokens out of band, trades them for an agent id
//! plus refresh token on `auth.request`, and rotates refresh tokens (and
//! optionally the agent's key) on `auth.refresh`. The per-agent trust record
//! lives in the injected trust store; this crate never reaches back into the
//! server.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info};

use btps_core::constants::{AUTH_TOKEN_TTL_MS, REFRESH_TOKEN_TTL_MS};
use btps_core::trust::{PrivacyType, TrustStatus};
use btps_core::{trust_id, BtpsError, Identity, TokenRecord, TrustRecord};
use btps_crypto::keys::PublicKey;
use btps_crypto::token::{generate_agent_id, generate_default_refresh_token};
use btps_store::{TokenStore, TrustPatch, TrustStore};

/// Inputs for minting a new agent.
pub struct CreateAgent {
    pub user_identity: Identity,
    /// PEM (SPKI) public key generated on the device.
    pub public_key_pem: String,
    pub agent_info: Option<Value>,
    pub decided_by: String,
    pub privacy_type: Option<PrivacyType>,
    pub trust_expiry_ms: Option<u64>,
}

/// Options for a refresh: a new key rotates the agent's trust record.
#[derive(Default)]
pub struct RefreshOptions {
    pub new_public_key_pem: Option<String>,
    pub agent_info: Option<Value>,
}

/// What the client gets back from `auth.request` / `auth.refresh`.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentSession {
    pub agent_id: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct AuthService {
    trust_store: Arc<dyn TrustStore>,
    token_store: Arc<dyn TokenStore>,
    auth_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl AuthService {
    pub fn new(trust_store: Arc<dyn TrustStore>, token_store: Arc<dyn TokenStore>) -> Self {
        Self {
            trust_store,
            token_store,
            auth_token_ttl: Duration::milliseconds(AUTH_TOKEN_TTL_MS as i64),
            refresh_token_ttl: Duration::milliseconds(REFRESH_TOKEN_TTL_MS as i64),
        }
    }

    /// Persist a short-lived auth token for `user_identity`. The token
    /// itself travels out of band (dashboard, QR code, onboarding email).
    pub async fn store_auth_token(
        &self,
        token: &str,
        user_identity: &Identity,
        metadata: Option<Value>,
    ) -> Result<(), BtpsError> {
        let now = Utc::now();
        self.token_store
            .store(TokenRecord {
                token: token.to_string(),
                holder: user_identity.to_string(),
                user_identity: user_identity.to_string(),
                created_at: now,
                expires_at: now + self.auth_token_ttl,
                decrypt_by: user_identity.to_string(),
                metadata,
            })
            .await?;
        debug!(identity = %user_identity, "auth token stored");
        Ok(())
    }

    /// Validate and consume an auth token. Single-use: a second call with
    /// the same pair fails.
    pub async fn validate_auth_token(
        &self,
        user_identity: &Identity,
        token: &str,
    ) -> Result<TokenRecord, BtpsError> {
        let holder = user_identity.as_str();
        let record = self
            .token_store
            .get(holder, token)
            .await?
            .ok_or_else(|| BtpsError::AuthenticationInvalid("unknown or expired auth token".into()))?;
        self.token_store.remove(holder, token).await?;
        Ok(record)
    }

    /// Mint an agent: a trust record binding the device key to the user,
    /// plus a refresh token.
    pub async fn create_agent(&self, request: CreateAgent) -> Result<AgentSession, BtpsError> {
        let fingerprint = PublicKey::from_pem(&request.public_key_pem)?.fingerprint()?;
        let agent_id = generate_agent_id();
        let now = Utc::now();
        let expires_at = now
            + request
                .trust_expiry_ms
                .map(|ms| Duration::milliseconds(ms as i64))
                .unwrap_or(self.refresh_token_ttl);

        let user = request.user_identity.to_string();
        self.trust_store
            .create(TrustRecord {
                id: trust_id(&agent_id, &user),
                sender_id: agent_id.clone(),
                receiver_id: user.clone(),
                status: TrustStatus::Accepted,
                created_at: now,
                decided_by: Some(request.decided_by),
                decided_at: Some(now),
                expires_at: Some(expires_at),
                public_key_pem: request.public_key_pem,
                public_key_fingerprint: fingerprint,
                key_history: Vec::new(),
                privacy_type: request.privacy_type.unwrap_or(PrivacyType::Encrypted),
                metadata: request.agent_info.clone(),
            })
            .await?;

        let refresh_token = self.issue_refresh_token(&agent_id, &user, request.agent_info).await?;
        info!(agent_id = %agent_id, identity = %user, "agent created");
        Ok(AgentSession { agent_id, refresh_token, expires_at })
    }

    /// Validate a refresh token, rotate it, optionally rotate the agent's
    /// key, and extend the trust expiry. The presented token is dead after
    /// this returns.
    pub async fn validate_and_reissue_refresh_token(
        &self,
        agent_id: &str,
        refresh_token: &str,
        options: RefreshOptions,
    ) -> Result<AgentSession, BtpsError> {
        let presented = self
            .token_store
            .get(agent_id, refresh_token)
            .await?
            .ok_or_else(|| {
                BtpsError::AuthenticationInvalid("unknown or expired refresh token".into())
            })?;

        let id = trust_id(agent_id, &presented.user_identity);
        let record = self.trust_store.get_by_id(&id).await?.ok_or_else(|| {
            BtpsError::AuthenticationInvalid(format!("no trust record for agent {agent_id}"))
        })?;

        let now = Utc::now();
        let expires_at = now + self.refresh_token_ttl;
        let mut patch = TrustPatch {
            expires_at: Some(Some(expires_at)),
            ..Default::default()
        };
        if let Some(new_pem) = options.new_public_key_pem {
            let new_fingerprint = PublicKey::from_pem(&new_pem)?.fingerprint()?;
            let mut rotated = record.clone();
            rotated.rotate_key(new_pem, new_fingerprint, now);
            patch.public_key_pem = Some(rotated.public_key_pem);
            patch.public_key_fingerprint = Some(rotated.public_key_fingerprint);
            patch.key_history = Some(rotated.key_history);
            debug!(agent_id, "agent key rotated on refresh");
        }
        self.trust_store.update(&id, patch).await?;

        self.token_store.remove(agent_id, refresh_token).await?;
        let new_token = self
            .issue_refresh_token(agent_id, &presented.user_identity, options.agent_info)
            .await?;
        Ok(AgentSession {
            agent_id: agent_id.to_string(),
            refresh_token: new_token,
            expires_at,
        })
    }

    async fn issue_refresh_token(
        &self,
        agent_id: &str,
        user_identity: &str,
        metadata: Option<Value>,
    ) -> Result<String, BtpsError> {
        let token = generate_default_refresh_token();
        let now = Utc::now();
        self.token_store
            .store(TokenRecord {
                token: token.clone(),
                holder: agent_id.to_string(),
                user_identity: user_identity.to_string(),
                created_at: now,
                expires_at: now + self.refresh_token_ttl,
                decrypt_by: user_identity.to_string(),
                metadata,
            })
            .await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btps_store::{MemoryTokenStore, MemoryTrustStore};
    use once_cell::sync::Lazy;

    static DEVICE_KEY: Lazy<btps_crypto::BtpsKeyPair> =
        Lazy::new(|| btps_crypto::BtpsKeyPair::generate_rsa().unwrap());

    fn service() -> AuthService {
        AuthService::new(Arc::new(MemoryTrustStore::new()), Arc::new(MemoryTokenStore::new()))
    }

    fn service_with_stores() -> (AuthService, Arc<MemoryTrustStore>, Arc<MemoryTokenStore>) {
        let trust = Arc::new(MemoryTrustStore::new());
        let tokens = Arc::new(MemoryTokenStore::new());
        (AuthService::new(trust.clone(), tokens.clone()), trust, tokens)
    }

    fn finance() -> Identity {
        Identity::parse("finance$x.com").unwrap()
    }

    #[tokio::test]
    async fn auth_tokens_are_single_use() {
        let svc = service();
        svc.store_auth_token("YDVKSEU4CEEW", &finance(), None).await.unwrap();

        let record = svc.validate_auth_token(&finance(), "YDVKSEU4CEEW").await.unwrap();
        assert_eq!(record.user_identity, "finance$x.com");

        let err = svc.validate_auth_token(&finance(), "YDVKSEU4CEEW").await.unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_INVALID");
    }

    #[tokio::test]
    async fn create_agent_mints_trust_and_refresh_token() {
        let (svc, trust, _) = service_with_stores();
        let session = svc
            .create_agent(CreateAgent {
                user_identity: finance(),
                public_key_pem: DEVICE_KEY.public_key_pem().unwrap(),
                agent_info: None,
                decided_by: "finance$x.com".into(),
                privacy_type: None,
                trust_expiry_ms: None,
            })
            .await
            .unwrap();

        assert!(session.agent_id.starts_with("btps_ag_"));
        let record = trust
            .get_by_id(&trust_id(&session.agent_id, "finance$x.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, TrustStatus::Accepted);
        assert_eq!(
            record.public_key_fingerprint,
            DEVICE_KEY.public_key().fingerprint().unwrap()
        );
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_key() {
        let (svc, trust, _) = service_with_stores();
        let session = svc
            .create_agent(CreateAgent {
                user_identity: finance(),
                public_key_pem: DEVICE_KEY.public_key_pem().unwrap(),
                agent_info: None,
                decided_by: "finance$x.com".into(),
                privacy_type: None,
                trust_expiry_ms: None,
            })
            .await
            .unwrap();

        let new_key = btps_crypto::BtpsKeyPair::generate_ed25519();
        let old_fingerprint = DEVICE_KEY.public_key().fingerprint().unwrap();

        let renewed = svc
            .validate_and_reissue_refresh_token(
                &session.agent_id,
                &session.refresh_token,
                RefreshOptions {
                    new_public_key_pem: Some(new_key.public_key_pem().unwrap()),
                    agent_info: None,
                },
            )
            .await
            .unwrap();
        assert_ne!(renewed.refresh_token, session.refresh_token);

        // Old refresh token is dead, the new one works exactly once.
        let err = svc
            .validate_and_reissue_refresh_token(
                &session.agent_id,
                &session.refresh_token,
                RefreshOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION_INVALID");

        svc.validate_and_reissue_refresh_token(
            &session.agent_id,
            &renewed.refresh_token,
            RefreshOptions::default(),
        )
        .await
        .unwrap();

        let record = trust
            .get_by_id(&trust_id(&session.agent_id, "finance$x.com"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            record.public_key_fingerprint,
            new_key.public_key().fingerprint().unwrap()
        );
        assert!(record
            .key_history
            .iter()
            .any(|e| e.fingerprint == old_fingerprint));
    }
}
