//! Artifact construction: sign-then-encrypt, in four deterministic steps.
//!
//! (i) resolve the recipient's current key if encryption is requested,
//! (ii) encrypt the document and set the encryption block, (iii) assemble
//! the outer object without its `signature`, (iv) sign the canonical bytes
//! and attach the block. The server strips `signature` and canonicalizes the
//! remainder, so the bytes signed here are exactly the bytes verified there.

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use btps_core::artifact::{
    EncryptionAlgorithm, EncryptionBlock, EncryptionMode, HashAlgorithm, SignatureBlock,
    TransporterArtifact, TransporterType,
};
use btps_core::constants::PROTOCOL_VERSION;
use btps_core::document::AgentAction;
use btps_core::{AgentArtifact, BtpsError, Identity, ServerArtifact};
use btps_crypto::encrypt::encrypt_document;
use btps_crypto::keys::BtpsKeyPair;
use btps_crypto::sign::sign_payload;
use btps_resolver::KeyResolver;

/// How to encrypt an outbound document.
#[derive(Clone, Copy, Debug)]
pub struct EncryptionRequest {
    pub mode: EncryptionMode,
    pub algorithm: EncryptionAlgorithm,
}

impl Default for EncryptionRequest {
    fn default() -> Self {
        Self { mode: EncryptionMode::Standard, algorithm: EncryptionAlgorithm::Aes256Gcm }
    }
}

fn placeholder_signature() -> SignatureBlock {
    SignatureBlock {
        algorithm_hash: HashAlgorithm::Sha256,
        value: String::new(),
        fingerprint: String::new(),
    }
}

/// Build a signed transporter artifact from `from` to `to`.
///
/// `selector` is the selector the sender's key is currently published
/// under; it travels with the artifact so verification survives rotation.
pub async fn build_transporter(
    resolver: &dyn KeyResolver,
    keypair: &BtpsKeyPair,
    from: Identity,
    to: Identity,
    selector: &str,
    artifact_type: TransporterType,
    document: Value,
    encryption: Option<EncryptionRequest>,
) -> Result<TransporterArtifact, BtpsError> {
    let (document, encryption_block) = match encryption {
        Some(request) => {
            let endpoint = resolver.resolve_host(&to).await?;
            let recipient_pem = resolver.resolve_public_key(&to, &endpoint.selector).await?;
            let (ciphertext, block) =
                encrypt_document(&document, &recipient_pem, request.mode, request.algorithm)?;
            (Value::String(ciphertext), Some(block))
        }
        None => (document, None),
    };

    let mut artifact = TransporterArtifact {
        version: PROTOCOL_VERSION.to_string(),
        id: Uuid::new_v4().to_string(),
        issued_at: Utc::now(),
        artifact_type,
        from,
        to,
        selector: selector.to_string(),
        signature: placeholder_signature(),
        encryption: encryption_block,
        document,
        delegation: None,
    };
    artifact.signature = sign_over(&ServerArtifact::Transporter(artifact.clone()), keypair)?;
    Ok(artifact)
}

/// Build a signed agent artifact for `action` against the agent's own host.
pub fn build_agent_artifact(
    keypair: &BtpsKeyPair,
    agent_id: &str,
    to: Identity,
    action: AgentAction,
    document: Option<Value>,
    encryption: Option<EncryptionBlock>,
) -> Result<AgentArtifact, BtpsError> {
    let mut artifact = AgentArtifact {
        id: Uuid::new_v4().to_string(),
        action,
        agent_id: agent_id.to_string(),
        to,
        issued_at: Utc::now(),
        signature: placeholder_signature(),
        encryption,
        document,
    };
    artifact.signature = sign_over(&ServerArtifact::Agent(artifact.clone()), keypair)?;
    Ok(artifact)
}

fn sign_over(artifact: &ServerArtifact, keypair: &BtpsKeyPair) -> Result<SignatureBlock, BtpsError> {
    sign_payload(&artifact.unsigned_value(), keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use btps_crypto::sign::verify_payload;
    use btps_resolver::{HostEndpoint, StaticResolver};
    use once_cell::sync::Lazy;
    use serde_json::json;

    static SENDER_KEY: Lazy<BtpsKeyPair> = Lazy::new(|| BtpsKeyPair::generate_rsa().unwrap());
    static RECIPIENT_KEY: Lazy<BtpsKeyPair> = Lazy::new(|| BtpsKeyPair::generate_rsa().unwrap());

    fn alice() -> Identity {
        Identity::parse("alice$a.com").unwrap()
    }

    fn bob() -> Identity {
        Identity::parse("bob$b.com").unwrap()
    }

    fn resolver() -> StaticResolver {
        let resolver = StaticResolver::new();
        resolver.add_host(
            "b.com",
            HostEndpoint { host: "inbox.b.com".into(), port: 3443, selector: "btps1".into() },
        );
        resolver.add_key(&bob(), "btps1", &RECIPIENT_KEY.public_key_pem().unwrap());
        resolver
    }

    #[tokio::test]
    async fn built_artifact_verifies_after_a_wire_round_trip() {
        let doc = json!({ "name": "Alice", "email": "alice@a.com", "reason": "billing" });
        let artifact = build_transporter(
            &resolver(),
            &SENDER_KEY,
            alice(),
            bob(),
            "btps1",
            TransporterType::TrustRequest,
            doc,
            None,
        )
        .await
        .unwrap();

        // Simulate the server: serialize, reparse, strip the signature, and
        // verify the canonical remainder.
        let line = serde_json::to_string(&artifact).unwrap();
        let reparsed: Value = serde_json::from_str(&line).unwrap();
        let received = btps_core::validate_artifact(&reparsed).unwrap();
        verify_payload(
            &received.unsigned_value(),
            received.signature().unwrap(),
            &SENDER_KEY.public_key_pem().unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn encrypted_build_produces_a_string_document() {
        let doc = json!({
            "id": "inv-7",
            "title": "March services",
            "issuedAt": "2026-03-01T00:00:00Z",
            "status": "unpaid",
            "totalAmount": 1200.0,
            "currency": "USD",
            "lineItems": { "columns": ["desc", "amount"], "rows": [["work", 1200.0]] },
        });
        let artifact = build_transporter(
            &resolver(),
            &SENDER_KEY,
            alice(),
            bob(),
            "btps1",
            TransporterType::Document,
            doc.clone(),
            Some(EncryptionRequest::default()),
        )
        .await
        .unwrap();

        assert!(artifact.document.is_string());
        let block = artifact.encryption.clone().unwrap();
        let ciphertext = artifact.document.as_str().unwrap();
        let decrypted =
            btps_crypto::decrypt_document(ciphertext, &block, &RECIPIENT_KEY).unwrap();
        assert_eq!(decrypted, doc);

        // The signature covers the ciphertext form.
        verify_payload(
            &ServerArtifact::Transporter(artifact.clone()).unsigned_value(),
            &artifact.signature,
            &SENDER_KEY.public_key_pem().unwrap(),
        )
        .unwrap();
    }

    #[tokio::test]
    async fn agent_artifacts_sign_the_same_way() {
        let device = BtpsKeyPair::generate_ed25519();
        let artifact = build_agent_artifact(
            &device,
            "btps_ag_123",
            alice(),
            AgentAction::InboxFetch,
            None,
            None,
        )
        .unwrap();
        verify_payload(
            &ServerArtifact::Agent(artifact.clone()).unsigned_value(),
            &artifact.signature,
            &device.public_key_pem().unwrap(),
        )
        .unwrap();
    }
}
