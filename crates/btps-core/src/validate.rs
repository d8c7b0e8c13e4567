//! Schema-level artifact validation.
//!
//! Selects the artifact variant by shape, deserializes it, and applies the
//! per-variant rules the pipeline relies on before any cryptography runs:
//! encrypted documents are strings, document-bearing actions carry documents,
//! and cleartext documents match the schema keyed by type or action.

use serde_json::Value;

use crate::artifact::{
    AgentArtifact, ControlArtifact, IdentityLookupArtifact, ServerArtifact, TransporterArtifact,
    TransporterType,
};
use crate::document::{
    AgentAction, AgentTrustRequestDocument, AgentTrustResponseDocument, ArtifactSendDocument,
    AuthRefreshDocument, AuthRequestDocument, InvoiceDocument, MailboxMutationDocument,
    TrustMutationDocument, TrustRequestDocument, TrustResponseDocument,
};
use crate::error::BtpsError;

/// Validate a parsed JSON value as a BTPS artifact.
pub fn validate_artifact(value: &Value) -> Result<ServerArtifact, BtpsError> {
    let obj = value
        .as_object()
        .ok_or_else(|| BtpsError::Validation("artifact must be a JSON object".into()))?;

    if obj.contains_key("type") {
        let artifact: TransporterArtifact = deserialize(value)?;
        validate_transporter(&artifact)?;
        return Ok(ServerArtifact::Transporter(artifact));
    }

    if obj.contains_key("action") && obj.contains_key("agentId") {
        let artifact: AgentArtifact = deserialize(value)?;
        validate_agent(&artifact)?;
        return Ok(ServerArtifact::Agent(artifact));
    }

    if matches!(obj.get("action").and_then(Value::as_str), Some("PING" | "QUIT")) {
        let artifact: ControlArtifact = deserialize(value)?;
        return Ok(ServerArtifact::Control(artifact));
    }

    if obj.contains_key("identity") && obj.contains_key("hostSelector") {
        let artifact: IdentityLookupArtifact = deserialize(value)?;
        return Ok(ServerArtifact::IdentityLookup(artifact));
    }

    Err(BtpsError::Validation(
        "unrecognized artifact shape: expected transporter, agent, control, or identity lookup"
            .into(),
    ))
}

fn deserialize<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, BtpsError> {
    serde_json::from_value(value.clone()).map_err(|e| BtpsError::Validation(e.to_string()))
}

fn validate_transporter(artifact: &TransporterArtifact) -> Result<(), BtpsError> {
    if artifact.encryption.is_some() {
        if !artifact.document.is_string() {
            return Err(BtpsError::Validation(
                "encrypted artifact must carry a base64 string document".into(),
            ));
        }
        return Ok(());
    }
    match artifact.artifact_type {
        TransporterType::TrustRequest => {
            deserialize::<TrustRequestDocument>(&artifact.document)?;
        }
        TransporterType::TrustResponse => {
            deserialize::<TrustResponseDocument>(&artifact.document)?;
        }
        TransporterType::Document => {
            deserialize::<InvoiceDocument>(&artifact.document)?;
        }
    }
    Ok(())
}

fn validate_agent(artifact: &AgentArtifact) -> Result<(), BtpsError> {
    let action = artifact.action;

    let document = match &artifact.document {
        Some(doc) => doc,
        None => {
            if action.requires_document() {
                return Err(BtpsError::Validation(format!(
                    "action {action:?} requires a document"
                )));
            }
            return Ok(());
        }
    };

    if artifact.encryption.is_some() {
        // The server cannot decrypt anything for an agent it has never met.
        if action == AgentAction::AuthRequest {
            return Err(BtpsError::Validation(
                "auth.request must not carry an encrypted document".into(),
            ));
        }
        if !document.is_string() {
            return Err(BtpsError::Validation(
                "encrypted artifact must carry a base64 string document".into(),
            ));
        }
        return Ok(());
    }

    match action {
        AgentAction::AuthRequest => {
            deserialize::<AuthRequestDocument>(document)?;
        }
        AgentAction::AuthRefresh => {
            deserialize::<AuthRefreshDocument>(document)?;
        }
        AgentAction::TrustRequest => {
            deserialize::<AgentTrustRequestDocument>(document)?;
        }
        AgentAction::TrustRespond => {
            deserialize::<AgentTrustResponseDocument>(document)?;
        }
        AgentAction::TrustUpdate | AgentAction::TrustDelete => {
            deserialize::<TrustMutationDocument>(document)?;
        }
        AgentAction::InboxSeen
        | AgentAction::InboxDelete
        | AgentAction::OutboxCancel
        | AgentAction::TrashDelete => {
            deserialize::<MailboxMutationDocument>(document)?;
        }
        AgentAction::ArtifactSend => {
            deserialize::<ArtifactSendDocument>(document)?;
        }
        AgentAction::DraftCreate | AgentAction::DraftUpdate | AgentAction::DraftDelete => {
            if !document.is_object() {
                return Err(BtpsError::Validation("draft document must be an object".into()));
            }
        }
        // Fetch-style actions take an optional filter object.
        _ => {
            if !document.is_object() {
                return Err(BtpsError::Validation(format!(
                    "document for {action:?} must be an object"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signature() -> Value {
        json!({ "algorithmHash": "sha256", "value": "c2ln", "fingerprint": "Zm9v" })
    }

    fn trust_req(document: Value) -> Value {
        json!({
            "version": "1.0.0",
            "id": "t1",
            "issuedAt": "2026-01-05T10:00:00Z",
            "type": "TRUST_REQ",
            "from": "alice$a.com",
            "to": "bob$b.com",
            "selector": "btps1",
            "signature": signature(),
            "encryption": null,
            "document": document,
        })
    }

    #[test]
    fn classifies_all_four_variants() {
        let doc = json!({ "name": "Alice", "email": "a@a.com", "reason": "billing" });
        assert!(matches!(
            validate_artifact(&trust_req(doc)).unwrap(),
            ServerArtifact::Transporter(_)
        ));

        let agent = json!({
            "id": "a1",
            "action": "inbox.fetch",
            "agentId": "btps_ag_x",
            "to": "alice$a.com",
            "issuedAt": "2026-01-05T10:00:00Z",
            "signature": signature(),
            "encryption": null,
        });
        assert!(matches!(validate_artifact(&agent).unwrap(), ServerArtifact::Agent(_)));

        let control = json!({
            "version": "1.0.0",
            "id": "c1",
            "issuedAt": "2026-01-05T10:00:00Z",
            "action": "PING",
        });
        assert!(matches!(validate_artifact(&control).unwrap(), ServerArtifact::Control(_)));

        let lookup = json!({
            "version": "1.0.0",
            "id": "l1",
            "issuedAt": "2026-01-05T10:00:00Z",
            "identity": "bob$b.com",
            "from": "alice$a.com",
            "hostSelector": "btps1",
        });
        assert!(matches!(
            validate_artifact(&lookup).unwrap(),
            ServerArtifact::IdentityLookup(_)
        ));
    }

    #[test]
    fn encrypted_document_must_be_a_string() {
        let mut v = trust_req(json!({ "inline": "object" }));
        v["encryption"] = json!({
            "algorithm": "aes-256-gcm",
            "mode": "standardEncrypt",
            "encryptedKey": "a2V5",
            "iv": "aXY=",
            "authTag": "dGFn",
        });
        let err = validate_artifact(&v).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");

        v["document"] = json!("Y2lwaGVydGV4dA==");
        assert!(validate_artifact(&v).is_ok());
    }

    #[test]
    fn cleartext_document_must_match_type_schema() {
        // Missing `reason` on a trust request.
        let v = trust_req(json!({ "name": "Alice", "email": "a@a.com" }));
        assert_eq!(validate_artifact(&v).unwrap_err().code(), "VALIDATION");
    }

    #[test]
    fn document_bearing_action_without_document_is_rejected() {
        let agent = json!({
            "id": "a1",
            "action": "inbox.seen",
            "agentId": "btps_ag_x",
            "to": "alice$a.com",
            "issuedAt": "2026-01-05T10:00:00Z",
            "signature": signature(),
            "encryption": null,
        });
        assert_eq!(validate_artifact(&agent).unwrap_err().code(), "VALIDATION");
    }

    #[test]
    fn encrypted_auth_request_is_rejected() {
        let agent = json!({
            "id": "a1",
            "action": "auth.request",
            "agentId": "btps_ag_temp",
            "to": "alice$a.com",
            "issuedAt": "2026-01-05T10:00:00Z",
            "signature": signature(),
            "encryption": {
                "algorithm": "aes-256-gcm",
                "mode": "standardEncrypt",
                "encryptedKey": "a2V5",
                "iv": "aXY=",
                "authTag": "dGFn",
            },
            "document": "Y2lwaGVydGV4dA==",
        });
        assert_eq!(validate_artifact(&agent).unwrap_err().code(), "VALIDATION");
    }

    #[test]
    fn unknown_shape_is_rejected() {
        assert!(validate_artifact(&json!({ "hello": "world" })).is_err());
        assert!(validate_artifact(&json!(42)).is_err());
    }
}
