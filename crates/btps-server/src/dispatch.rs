//! Artifact dispatch.
//!
//! The last pipeline step: control and identity-lookup artifacts are
//! answered here, `auth.*` actions invoke the authentication service, and
//! everything else is offered to the handlers a host registered with
//! `on_incoming_artifact`. A handler that answers through the
//! [`ResponseCtx`] wins; otherwise the pipeline falls back to the default
//! 200 acknowledgement.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use btps_auth::{AuthService, CreateAgent, RefreshOptions};
use btps_core::artifact::ControlAction;
use btps_core::document::{AgentAction, AuthRefreshDocument, AuthRequestDocument};
use btps_core::{BtpsError, BtpsResponse, ServerArtifact};
use btps_resolver::IdentityKeyRecord;

use crate::context::ResponseCtx;

/// What an `on_incoming_artifact` handler receives.
pub struct ArtifactEvent {
    pub artifact: Arc<ServerArtifact>,
    pub remote_addr: Option<IpAddr>,
}

#[async_trait]
pub trait ArtifactHandler: Send + Sync {
    async fn handle(&self, event: &ArtifactEvent, res: &ResponseCtx) -> Result<(), BtpsError>;
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn ArtifactHandler>>>,
    auth: Option<Arc<AuthService>>,
    /// Key records this host serves for identity lookups.
    identity_records: RwLock<HashMap<String, IdentityKeyRecord>>,
}

impl Dispatcher {
    pub fn new(auth: Option<Arc<AuthService>>) -> Self {
        Self { auth, ..Self::default() }
    }

    pub fn on_incoming_artifact(&self, handler: Arc<dyn ArtifactHandler>) {
        self.handlers.write().expect("dispatcher lock poisoned").push(handler);
    }

    /// Publish a key record for the identity-lookup service.
    pub fn add_identity_record(&self, record: IdentityKeyRecord) -> Result<(), BtpsError> {
        record.validate()?;
        self.identity_records
            .write()
            .expect("dispatcher lock poisoned")
            .insert(record.identity.to_string(), record);
        Ok(())
    }

    pub async fn dispatch(
        &self,
        artifact: &Arc<ServerArtifact>,
        remote_addr: Option<IpAddr>,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        match artifact.as_ref() {
            ServerArtifact::Control(control) => {
                debug!(action = ?control.action, "control artifact");
                // QUIT closure is the connection's business; both get an ack.
                match control.action {
                    ControlAction::Ping | ControlAction::Quit => {
                        res.send_res(BtpsResponse::ok(&control.id));
                    }
                }
                return Ok(());
            }
            ServerArtifact::IdentityLookup(lookup) => {
                let records = self.identity_records.read().expect("dispatcher lock poisoned");
                let record = records.get(lookup.identity.as_str()).ok_or_else(|| {
                    BtpsError::ResolvePubkey(format!("no key record for {}", lookup.identity))
                })?;
                let selector =
                    lookup.identity_selector.as_deref().unwrap_or(&record.current_selector);
                let entry = record.key_for(selector).ok_or_else(|| {
                    BtpsError::SelectorNotFound {
                        identity: lookup.identity.to_string(),
                        selector: selector.to_string(),
                    }
                })?;
                res.send_res(BtpsResponse::ok_with_document(
                    &lookup.id,
                    json!({
                        "identity": record.identity,
                        "selector": entry.selector,
                        "publicKey": entry.public_key,
                        "keyType": entry.key_type,
                        "version": entry.version,
                        "createdAt": entry.created_at,
                    }),
                ));
                return Ok(());
            }
            ServerArtifact::Agent(agent) => match agent.action {
                AgentAction::AuthRequest => return self.handle_auth_request(artifact, res).await,
                AgentAction::AuthRefresh => return self.handle_auth_refresh(artifact, res).await,
                _ => {}
            },
            ServerArtifact::Transporter(_) => {}
        }

        let handlers: Vec<Arc<dyn ArtifactHandler>> =
            self.handlers.read().expect("dispatcher lock poisoned").clone();
        let event = ArtifactEvent { artifact: Arc::clone(artifact), remote_addr };
        for handler in handlers {
            if res.response_sent() {
                break;
            }
            handler.handle(&event, res).await?;
        }
        Ok(())
    }

    async fn handle_auth_request(
        &self,
        artifact: &Arc<ServerArtifact>,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        let ServerArtifact::Agent(agent) = artifact.as_ref() else { unreachable!() };
        let auth = self.auth_service()?;
        let doc: AuthRequestDocument = parse_document(agent.document.as_ref())?;
        if doc.identity != agent.to {
            return Err(BtpsError::AuthenticationInvalid(
                "auth token identity does not match the artifact".into(),
            ));
        }

        auth.validate_auth_token(&doc.identity, &doc.auth_token).await?;
        let session = auth
            .create_agent(CreateAgent {
                user_identity: doc.identity.clone(),
                public_key_pem: doc.public_key,
                agent_info: doc.agent_info,
                decided_by: doc.identity.to_string(),
                privacy_type: None,
                trust_expiry_ms: None,
            })
            .await?;

        res.send_res(BtpsResponse::ok_with_document(
            &agent.id,
            json!({
                "agentId": session.agent_id,
                "refreshToken": session.refresh_token,
                "expiresAt": session.expires_at,
            }),
        ));
        Ok(())
    }

    async fn handle_auth_refresh(
        &self,
        artifact: &Arc<ServerArtifact>,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        let ServerArtifact::Agent(agent) = artifact.as_ref() else { unreachable!() };
        let auth = self.auth_service()?;
        let doc: AuthRefreshDocument = parse_document(agent.document.as_ref())?;

        let session = auth
            .validate_and_reissue_refresh_token(
                &agent.agent_id,
                &doc.refresh_token,
                RefreshOptions {
                    new_public_key_pem: doc.public_key,
                    agent_info: doc.agent_info,
                },
            )
            .await?;

        res.send_res(BtpsResponse::ok_with_document(
            &agent.id,
            json!({
                "agentId": session.agent_id,
                "refreshToken": session.refresh_token,
                "expiresAt": session.expires_at,
            }),
        ));
        Ok(())
    }

    fn auth_service(&self) -> Result<&Arc<AuthService>, BtpsError> {
        self.auth.as_ref().ok_or_else(|| {
            BtpsError::InvalidConfig("no authentication service configured".into())
        })
    }
}

pub(crate) fn parse_document<T: serde::de::DeserializeOwned>(
    document: Option<&serde_json::Value>,
) -> Result<T, BtpsError> {
    let value =
        document.ok_or_else(|| BtpsError::Validation("missing document".into()))?;
    serde_json::from_value(value.clone()).map_err(|e| BtpsError::Validation(e.to_string()))
}
