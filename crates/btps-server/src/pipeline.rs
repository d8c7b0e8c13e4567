//! The request pipeline.
//!
//! Per line: parse → attestation → delegation → signature → trust →
//! dispatch, with middleware interleaved before and after each step. Any
//! failure moves the artifact to the error path, which runs the `onError`
//! middleware and writes exactly one `btps_error` frame. The ordering is
//! load-bearing: a delegation must prove itself before the artifact
//! signature is checked against the delegated key, and trust is consulted
//! only over a signature that already verified.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use btps_core::artifact::{SignatureBlock, TransporterArtifact, TransporterType};
use btps_core::document::{AgentAction, AuthRequestDocument, TrustRequestDocument, TrustResponseDocument};
use btps_core::trust::{PrivacyType, TrustStatus};
use btps_core::{trust_id, validate_artifact, AgentArtifact, BtpsError, BtpsResponse, ServerArtifact, TrustRecord};
use btps_crypto::keys::PublicKey;
use btps_crypto::sign::verify_payload;
use btps_resolver::KeyResolver;
use btps_store::{TrustPatch, TrustStore};

use crate::context::{ResponseCtx, StepContext};
use crate::dispatch::{parse_document, Dispatcher};
use crate::middleware::{MiddlewareManager, Phase, Step};

pub struct Pipeline {
    resolver: Arc<dyn KeyResolver>,
    trust_store: Arc<dyn TrustStore>,
    middleware: Arc<MiddlewareManager>,
    dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        trust_store: Arc<dyn TrustStore>,
        middleware: Arc<MiddlewareManager>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self { resolver, trust_store, middleware, dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn middleware(&self) -> &Arc<MiddlewareManager> {
        &self.middleware
    }

    /// Process one request line. On return the [`ResponseCtx`] holds exactly
    /// one response, success or error. Returns the parsed artifact when
    /// parsing got that far, so the connection can tell control frames apart.
    pub async fn process_line(
        &self,
        raw: &str,
        remote_addr: Option<IpAddr>,
        res: &ResponseCtx,
    ) -> Option<Arc<ServerArtifact>> {
        let mut parsed: Option<Arc<ServerArtifact>> = None;
        match self.run(raw, remote_addr, res, &mut parsed).await {
            Ok(()) => {
                if !res.response_sent() {
                    match &parsed {
                        Some(artifact) => res.send_res(BtpsResponse::ok(artifact.id())),
                        None => res.send_error(
                            500,
                            "UNKNOWN: request terminated without a response",
                        ),
                    }
                }
            }
            Err(error) => {
                warn!(code = error.code(), error = %error, "artifact errored");
                let error = Arc::new(error);
                let ctx =
                    StepContext::OnError { error: Arc::clone(&error), data: parsed.clone() };
                let _ = self.middleware.run(Phase::Before, Step::OnError, &ctx, res).await;
                let _ = self.middleware.run(Phase::After, Step::OnError, &ctx, res).await;
                if !res.response_sent() {
                    res.send_typed_error(&error);
                }
            }
        }
        parsed
    }

    async fn run(
        &self,
        raw: &str,
        remote_addr: Option<IpAddr>,
        res: &ResponseCtx,
        parsed: &mut Option<Arc<ServerArtifact>>,
    ) -> Result<(), BtpsError> {
        let ctx =
            StepContext::ParsingBefore { raw_packet: raw.to_string(), remote_addr };
        self.middleware.run(Phase::Before, Step::Parsing, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|e| BtpsError::InvalidJson(e.to_string()))?;
        let artifact = Arc::new(validate_artifact(&value)?);
        res.set_req_id(artifact.id());
        *parsed = Some(Arc::clone(&artifact));
        debug!(
            id = artifact.id(),
            immediate = artifact.requires_immediate_response(),
            "artifact parsed"
        );

        let ctx = StepContext::ParsingAfter { data: Arc::clone(&artifact), remote_addr };
        self.middleware.run(Phase::After, Step::Parsing, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        match artifact.as_ref() {
            ServerArtifact::Transporter(t) => self.verify_transporter(&artifact, t, res).await?,
            ServerArtifact::Agent(a) => self.verify_agent(&artifact, a, res).await?,
            // Control and identity-lookup artifacts are unsigned.
            ServerArtifact::Control(_) | ServerArtifact::IdentityLookup(_) => {}
        }
        if res.response_sent() {
            return Ok(());
        }

        let ctx = StepContext::OnArtifact {
            data: Arc::clone(&artifact),
            is_valid: true,
            is_trusted: true,
        };
        self.middleware.run(Phase::Before, Step::OnArtifact, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }
        self.dispatcher.dispatch(&artifact, remote_addr, res).await?;
        self.middleware.run(Phase::After, Step::OnArtifact, &ctx, res).await?;
        Ok(())
    }

    // ── Transporter verification ─────────────────────────────────────────────

    async fn verify_transporter(
        &self,
        artifact: &Arc<ServerArtifact>,
        t: &TransporterArtifact,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        let ctx = StepContext::SignatureBefore { data: Arc::clone(artifact) };
        self.middleware.run(Phase::Before, Step::SignatureVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        let sender_pem = match &t.delegation {
            Some(delegation) => {
                if let Some(attestation) = &delegation.attestation {
                    let attestor_pem = self
                        .resolver
                        .resolve_public_key(&attestation.signed_by, &attestation.selector)
                        .await
                        .map_err(|e| BtpsError::AttestationVerification(e.to_string()))?;
                    let block = SignatureBlock {
                        algorithm_hash: attestation.algorithm_hash,
                        value: attestation.value.clone(),
                        fingerprint: attestation.fingerprint.clone(),
                    };
                    verify_payload(&delegation.attestation_payload(), &block, &attestor_pem)
                        .map_err(|e| BtpsError::AttestationVerification(e.to_string()))?;
                    debug!(attestor = %attestation.signed_by, "attestation verified");
                }

                let delegator_pem = self
                    .resolver
                    .resolve_public_key(&delegation.signed_by, &delegation.selector)
                    .await?;
                verify_payload(&delegation.signing_payload(), &delegation.signature, &delegator_pem)
                    .map_err(|e| BtpsError::DelegationSigVerification(e.to_string()))?;

                if t.from != delegation.signed_by {
                    return Err(BtpsError::DelegationInvalid(format!(
                        "artifact sender {} is not the delegating identity {}",
                        t.from, delegation.signed_by
                    )));
                }
                let agent_fingerprint = PublicKey::from_pem(&delegation.agent_pub_key)
                    .map_err(|e| BtpsError::DelegationInvalid(e.to_string()))?
                    .fingerprint()?;
                if agent_fingerprint != t.signature.fingerprint {
                    return Err(BtpsError::DelegationInvalid(
                        "delegated key fingerprint does not match the artifact signature".into(),
                    ));
                }
                debug!(agent_id = %delegation.agent_id, "delegation verified");
                delegation.agent_pub_key.clone()
            }
            None => self.resolver.resolve_public_key(&t.from, &t.selector).await?,
        };

        verify_payload(&artifact.unsigned_value(), &t.signature, &sender_pem)?;
        debug!(from = %t.from, selector = %t.selector, "signature verified");

        let ctx = StepContext::SignatureAfter { data: Arc::clone(artifact), is_valid: true };
        self.middleware.run(Phase::After, Step::SignatureVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        let ctx = StepContext::TrustBefore { data: Arc::clone(artifact) };
        self.middleware.run(Phase::Before, Step::TrustVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        self.check_transporter_trust(t, &sender_pem).await?;

        let ctx = StepContext::TrustAfter { data: Arc::clone(artifact), is_trusted: true };
        self.middleware.run(Phase::After, Step::TrustVerification, &ctx, res).await?;
        Ok(())
    }

    async fn check_transporter_trust(
        &self,
        t: &TransporterArtifact,
        sender_pem: &str,
    ) -> Result<(), BtpsError> {
        let now = Utc::now();
        match t.artifact_type {
            TransporterType::TrustRequest => {
                let doc: TrustRequestDocument = cleartext_document(t)?;
                let id = trust_id(t.from.as_str(), t.to.as_str());
                match self.trust_store.get_by_id(&id).await? {
                    Some(record) if record.status == TrustStatus::Blocked => {
                        Err(BtpsError::TrustBlocked {
                            sender: t.from.to_string(),
                            receiver: t.to.to_string(),
                        })
                    }
                    Some(record) if record.is_active(now) => {
                        Err(BtpsError::TrustAlreadyActive {
                            sender: t.from.to_string(),
                            receiver: t.to.to_string(),
                        })
                    }
                    Some(_) => {
                        // A re-request after rejection or expiry goes back to
                        // pending under the sender's current key.
                        self.trust_store
                            .update(
                                &id,
                                TrustPatch {
                                    status: Some(TrustStatus::Pending),
                                    public_key_pem: Some(sender_pem.to_string()),
                                    public_key_fingerprint: Some(t.signature.fingerprint.clone()),
                                    privacy_type: doc.privacy_type,
                                    ..Default::default()
                                },
                            )
                            .await?;
                        Ok(())
                    }
                    None => {
                        self.trust_store
                            .create(TrustRecord {
                                id,
                                sender_id: t.from.to_string(),
                                receiver_id: t.to.to_string(),
                                status: TrustStatus::Pending,
                                created_at: now,
                                decided_by: None,
                                decided_at: None,
                                expires_at: None,
                                public_key_pem: sender_pem.to_string(),
                                public_key_fingerprint: t.signature.fingerprint.clone(),
                                key_history: Vec::new(),
                                privacy_type: doc.privacy_type.unwrap_or(PrivacyType::Unencrypted),
                                metadata: None,
                            })
                            .await?;
                        debug!(from = %t.from, to = %t.to, "pending trust created");
                        Ok(())
                    }
                }
            }
            TransporterType::TrustResponse => {
                let doc: TrustResponseDocument = cleartext_document(t)?;
                if doc.decision == TrustStatus::Pending {
                    return Err(BtpsError::Validation("pending is not a trust decision".into()));
                }
                // The original request ran to the responder, so the record is
                // keyed (requester, responder) = (to, from).
                let id = trust_id(t.to.as_str(), t.from.as_str());
                let record = self.trust_store.get_by_id(&id).await?.ok_or_else(|| {
                    BtpsError::TrustNonExistent {
                        sender: t.to.to_string(),
                        receiver: t.from.to_string(),
                    }
                })?;
                if record.receiver_id != t.from.as_str() {
                    return Err(BtpsError::TrustNotAllowed(
                        "trust response not authored by the requested receiver".into(),
                    ));
                }
                self.trust_store
                    .update(
                        &id,
                        TrustPatch {
                            status: Some(doc.decision),
                            decided_by: Some(t.from.to_string()),
                            decided_at: Some(doc.decided_at),
                            expires_at: Some(doc.expires_at),
                            privacy_type: doc.privacy_type,
                            ..Default::default()
                        },
                    )
                    .await?;
                debug!(from = %t.from, decision = ?doc.decision, "trust decided");
                Ok(())
            }
            TransporterType::Document => {
                let id = trust_id(t.from.as_str(), t.to.as_str());
                let record = self.trust_store.get_by_id(&id).await?.ok_or_else(|| {
                    BtpsError::TrustNonExistent {
                        sender: t.from.to_string(),
                        receiver: t.to.to_string(),
                    }
                })?;
                if record.status == TrustStatus::Blocked {
                    return Err(BtpsError::TrustBlocked {
                        sender: t.from.to_string(),
                        receiver: t.to.to_string(),
                    });
                }
                if !record.is_active(now) {
                    return Err(BtpsError::TrustNonExistent {
                        sender: t.from.to_string(),
                        receiver: t.to.to_string(),
                    });
                }
                match (record.privacy_type, t.encryption.is_some()) {
                    (PrivacyType::Encrypted, false) => Err(BtpsError::TrustNotAllowed(
                        "this trust requires encrypted documents".into(),
                    )),
                    (PrivacyType::Unencrypted, true) => Err(BtpsError::TrustNotAllowed(
                        "this trust requires cleartext documents".into(),
                    )),
                    _ => Ok(()),
                }
            }
        }
    }

    // ── Agent verification ───────────────────────────────────────────────────

    async fn verify_agent(
        &self,
        artifact: &Arc<ServerArtifact>,
        a: &AgentArtifact,
        res: &ResponseCtx,
    ) -> Result<(), BtpsError> {
        let ctx = StepContext::SignatureBefore { data: Arc::clone(artifact) };
        self.middleware.run(Phase::Before, Step::SignatureVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        // A bootstrapping agent has no trust record yet; its enrollment is
        // self-signed with the key inside the document and gated by the
        // single-use auth token at dispatch.
        let trust_record = if a.action == AgentAction::AuthRequest {
            let doc: AuthRequestDocument = parse_document(a.document.as_ref())?;
            verify_payload(&artifact.unsigned_value(), &a.signature, &doc.public_key)?;
            None
        } else {
            let id = trust_id(&a.agent_id, a.to.as_str());
            let record = self.trust_store.get_by_id(&id).await?.ok_or_else(|| {
                BtpsError::TrustNonExistent {
                    sender: a.agent_id.clone(),
                    receiver: a.to.to_string(),
                }
            })?;
            verify_payload(&artifact.unsigned_value(), &a.signature, &record.public_key_pem)?;
            Some(record)
        };
        debug!(agent_id = %a.agent_id, action = ?a.action, "agent signature verified");

        let ctx = StepContext::SignatureAfter { data: Arc::clone(artifact), is_valid: true };
        self.middleware.run(Phase::After, Step::SignatureVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        let ctx = StepContext::TrustBefore { data: Arc::clone(artifact) };
        self.middleware.run(Phase::Before, Step::TrustVerification, &ctx, res).await?;
        if res.response_sent() {
            return Ok(());
        }

        if !a.action.allowed_without_trust() {
            let record = trust_record.ok_or_else(|| BtpsError::TrustNonExistent {
                sender: a.agent_id.clone(),
                receiver: a.to.to_string(),
            })?;
            if record.status == TrustStatus::Blocked {
                return Err(BtpsError::TrustBlocked {
                    sender: a.agent_id.clone(),
                    receiver: a.to.to_string(),
                });
            }
            if !record.is_active(Utc::now()) {
                return Err(BtpsError::TrustNonExistent {
                    sender: a.agent_id.clone(),
                    receiver: a.to.to_string(),
                });
            }
        }

        let ctx = StepContext::TrustAfter { data: Arc::clone(artifact), is_trusted: true };
        self.middleware.run(Phase::After, Step::TrustVerification, &ctx, res).await?;
        Ok(())
    }
}

fn cleartext_document<T: serde::de::DeserializeOwned>(
    t: &TransporterArtifact,
) -> Result<T, BtpsError> {
    if t.encryption.is_some() {
        // No trust exists yet during a trust exchange, so there is no agreed
        // key to hide the request behind.
        return Err(BtpsError::UnsupportedEncrypt(
            "trust exchange artifacts must be cleartext".into(),
        ));
    }
    serde_json::from_value(t.document.clone()).map_err(|e| BtpsError::Validation(e.to_string()))
}
