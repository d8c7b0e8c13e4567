//! Agent session bootstrap and refresh.
//!
//! `authenticate` trades a short-lived out-of-band token plus a fresh device
//! keypair for an agent id and refresh token; `refresh_session` rotates the
//! refresh token and optionally the device key.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use btps_core::document::{AgentAction, AuthRefreshDocument, AuthRequestDocument};
use btps_core::{BtpsError, BtpsResponse, Identity};
use btps_crypto::keys::BtpsKeyPair;
use btps_resolver::KeyResolver;

use crate::builder::build_agent_artifact;
use crate::transport::Transport;

/// The client's view of an issued agent session.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionState {
    pub agent_id: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Client for `auth.request` / `auth.refresh` against the identity's own
/// host.
pub struct AgentAuthClient<R: KeyResolver> {
    resolver: R,
    transport: Transport,
}

impl<R: KeyResolver> AgentAuthClient<R> {
    pub fn new(resolver: R, transport: Transport) -> Self {
        Self { resolver, transport }
    }

    /// Enroll this device: send the freshly generated public key plus the
    /// short-lived auth token, receive the agent id and refresh token.
    pub async fn authenticate(
        &self,
        identity: &Identity,
        auth_token: &str,
        keypair: &BtpsKeyPair,
        agent_info: Option<Value>,
    ) -> Result<AgentSessionState, BtpsError> {
        let endpoint = self.resolver.resolve_host(identity).await?;
        let document = serde_json::to_value(AuthRequestDocument {
            identity: identity.clone(),
            auth_token: auth_token.to_string(),
            public_key: keypair.public_key_pem()?,
            agent_info,
        })
        .map_err(|e| BtpsError::Validation(e.to_string()))?;

        // No agent id exists yet; the enrollment id is a placeholder the
        // server ignores.
        let artifact = build_agent_artifact(
            keypair,
            &format!("btps_ag_enroll_{}", Uuid::new_v4()),
            identity.clone(),
            AgentAction::AuthRequest,
            Some(document),
            None,
        )?;

        let response =
            self.transport.send_artifact(&endpoint.host, endpoint.port, &artifact).await?;
        let session = session_from_response(response)?;
        info!(agent_id = %session.agent_id, identity = %identity, "agent enrolled");
        Ok(session)
    }

    /// Rotate the refresh token; pass `new_keypair` to also rotate the
    /// device key. Signing uses the currently registered keypair.
    pub async fn refresh_session(
        &self,
        agent_id: &str,
        identity: &Identity,
        refresh_token: &str,
        keypair: &BtpsKeyPair,
        new_keypair: Option<&BtpsKeyPair>,
        agent_info: Option<Value>,
    ) -> Result<AgentSessionState, BtpsError> {
        let endpoint = self.resolver.resolve_host(identity).await?;
        let document = serde_json::to_value(AuthRefreshDocument {
            identity: identity.clone(),
            refresh_token: refresh_token.to_string(),
            public_key: new_keypair.map(|k| k.public_key_pem()).transpose()?,
            agent_info,
        })
        .map_err(|e| BtpsError::Validation(e.to_string()))?;

        let artifact = build_agent_artifact(
            keypair,
            agent_id,
            identity.clone(),
            AgentAction::AuthRefresh,
            Some(document),
            None,
        )?;

        let response =
            self.transport.send_artifact(&endpoint.host, endpoint.port, &artifact).await?;
        session_from_response(response)
    }
}

fn session_from_response(response: BtpsResponse) -> Result<AgentSessionState, BtpsError> {
    if !response.status.ok {
        return Err(BtpsError::AuthenticationInvalid(
            response.status.message.unwrap_or_else(|| "authentication refused".into()),
        ));
    }
    let document = response
        .document
        .ok_or_else(|| BtpsError::AuthenticationInvalid("response carried no session".into()))?;
    serde_json::from_value(document)
        .map_err(|e| BtpsError::AuthenticationInvalid(format!("malformed session document: {e}")))
}
