use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::AgentAction;
use crate::identity::Identity;

// ── Signature / encryption blocks ────────────────────────────────────────────

/// Digest algorithm for signature inputs. The protocol pins SHA-256.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "sha256")]
    Sha256,
}

/// A detached signature over the canonical JSON bytes of an artifact
/// (minus its `signature` field).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureBlock {
    pub algorithm_hash: HashAlgorithm,
    /// base64 signature bytes.
    pub value: String,
    /// base64(SHA-256(SPKI DER)) of the signing public key.
    pub fingerprint: String,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// Retained for decrypt compatibility with older senders.
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum EncryptionMode {
    #[serde(rename = "standardEncrypt")]
    Standard,
    /// Requires a second wrapping key bound to an authenticated session.
    #[serde(rename = "2faEncrypt")]
    TwoFactor,
}

/// Hybrid-encryption envelope: a fresh symmetric key encrypts the document,
/// RSA-OAEP wraps the symmetric key to the recipient.
///
/// Invariant: an artifact carrying one of these has a base64 string document.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionBlock {
    pub algorithm: EncryptionAlgorithm,
    pub mode: EncryptionMode,
    /// base64 RSA-OAEP-wrapped symmetric key.
    pub encrypted_key: String,
    /// base64 initialisation vector / nonce.
    pub iv: String,
    /// base64 GCM authentication tag. Absent for CBC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
}

// ── Delegation / attestation ─────────────────────────────────────────────────

/// Counter-signature over a delegation by an independent authority.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attestation {
    pub algorithm_hash: HashAlgorithm,
    pub value: String,
    pub fingerprint: String,
    /// The attesting identity; its key resolves via `(signed_by, selector)`.
    pub signed_by: Identity,
    pub selector: String,
}

/// A signed statement permitting a third-party agent key to sign on behalf
/// of `signed_by`.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub agent_id: String,
    /// PEM (SPKI) public key of the delegated agent.
    pub agent_pub_key: String,
    pub signed_by: Identity,
    pub issued_at: DateTime<Utc>,
    pub signature: SignatureBlock,
    /// Selector for resolving the delegator's key.
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attestation: Option<Attestation>,
}

impl Delegation {
    /// The JSON object the delegator signed: the binding of agent key to
    /// delegating identity, nothing else.
    pub fn signing_payload(&self) -> Value {
        serde_json::json!({
            "agentId": self.agent_id,
            "agentPubKey": self.agent_pub_key,
            "signedBy": self.signed_by,
            "issuedAt": self.issued_at,
        })
    }

    /// The JSON object the attestor counter-signed: the delegation with its
    /// `attestation` field removed (the delegator's signature stays in).
    pub fn attestation_payload(&self) -> Value {
        let mut v = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.remove("attestation");
        }
        v
    }
}

// ── Artifact variants ────────────────────────────────────────────────────────

/// Server-to-server artifact kinds.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum TransporterType {
    #[serde(rename = "TRUST_REQ")]
    TrustRequest,
    #[serde(rename = "TRUST_RES")]
    TrustResponse,
    #[serde(rename = "BTPS_DOC")]
    Document,
}

/// A signed (optionally encrypted) artifact sent between identity hosts.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransporterArtifact {
    pub version: String,
    pub id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub artifact_type: TransporterType,
    pub from: Identity,
    pub to: Identity,
    /// Selector the sender's key was published under at sign time.
    pub selector: String,
    pub signature: SignatureBlock,
    pub encryption: Option<EncryptionBlock>,
    /// Cleartext document object, or a base64 ciphertext string when
    /// `encryption` is set.
    pub document: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegation: Option<Delegation>,
}

/// An artifact from an authenticated device/session agent to its own host.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentArtifact {
    pub id: String,
    pub action: AgentAction,
    pub agent_id: String,
    /// The user identity this agent acts for.
    pub to: Identity,
    pub issued_at: DateTime<Utc>,
    pub signature: SignatureBlock,
    pub encryption: Option<EncryptionBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ControlAction {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "QUIT")]
    Quit,
}

/// Unsigned connection-control artifact.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlArtifact {
    pub version: String,
    pub id: String,
    pub issued_at: DateTime<Utc>,
    pub action: ControlAction,
}

/// Request for another identity's published key record.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityLookupArtifact {
    pub version: String,
    pub id: String,
    pub issued_at: DateTime<Utc>,
    /// The identity whose key record is requested.
    pub identity: Identity,
    pub from: Identity,
    /// Selector of the host handling the lookup.
    pub host_selector: String,
    /// Specific selector of the target identity; current when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_selector: Option<String>,
}

// ── The tagged union ─────────────────────────────────────────────────────────

/// Every artifact kind the server accepts, selected by shape.
#[derive(Clone, PartialEq, Debug)]
pub enum ServerArtifact {
    Transporter(TransporterArtifact),
    Agent(AgentArtifact),
    Control(ControlArtifact),
    IdentityLookup(IdentityLookupArtifact),
}

impl ServerArtifact {
    /// Artifact id, for response correlation.
    pub fn id(&self) -> &str {
        match self {
            Self::Transporter(a) => &a.id,
            Self::Agent(a) => &a.id,
            Self::Control(a) => &a.id,
            Self::IdentityLookup(a) => &a.id,
        }
    }

    /// Whether the response must be computed on this connection rather than
    /// acknowledged and queued. Control and identity-lookup artifacts are
    /// always immediate; agent actions are immediate unless they start a
    /// trust exchange that is relayed to the counterparty.
    pub fn requires_immediate_response(&self) -> bool {
        match self {
            Self::Control(_) | Self::IdentityLookup(_) => true,
            Self::Transporter(_) => false,
            Self::Agent(a) => a.action.is_immediate(),
        }
    }

    /// The artifact as a JSON value with its `signature` field removed:
    /// exactly the object whose canonical bytes were signed.
    pub fn unsigned_value(&self) -> Value {
        let mut v = match self {
            Self::Transporter(a) => serde_json::to_value(a),
            Self::Agent(a) => serde_json::to_value(a),
            Self::Control(a) => serde_json::to_value(a),
            Self::IdentityLookup(a) => serde_json::to_value(a),
        }
        .unwrap_or(Value::Null);
        if let Some(obj) = v.as_object_mut() {
            obj.remove("signature");
        }
        v
    }

    pub fn signature(&self) -> Option<&SignatureBlock> {
        match self {
            Self::Transporter(a) => Some(&a.signature),
            Self::Agent(a) => Some(&a.signature),
            Self::Control(_) | Self::IdentityLookup(_) => None,
        }
    }
}
