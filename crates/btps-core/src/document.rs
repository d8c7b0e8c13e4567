use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::Identity;
use crate::trust::{PrivacyType, TrustStatus};

// ── Agent actions ────────────────────────────────────────────────────────────

/// Everything an authenticated agent can ask its host to do.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum AgentAction {
    #[serde(rename = "trust.request")]
    TrustRequest,
    #[serde(rename = "trust.respond")]
    TrustRespond,
    #[serde(rename = "trust.update")]
    TrustUpdate,
    #[serde(rename = "trust.delete")]
    TrustDelete,
    #[serde(rename = "trust.fetch")]
    TrustFetch,
    #[serde(rename = "inbox.fetch")]
    InboxFetch,
    #[serde(rename = "inbox.seen")]
    InboxSeen,
    #[serde(rename = "inbox.delete")]
    InboxDelete,
    #[serde(rename = "outbox.fetch")]
    OutboxFetch,
    #[serde(rename = "outbox.cancel")]
    OutboxCancel,
    #[serde(rename = "sentbox.fetch")]
    SentboxFetch,
    #[serde(rename = "draft.create")]
    DraftCreate,
    #[serde(rename = "draft.update")]
    DraftUpdate,
    #[serde(rename = "draft.delete")]
    DraftDelete,
    #[serde(rename = "draft.fetch")]
    DraftFetch,
    #[serde(rename = "trash.fetch")]
    TrashFetch,
    #[serde(rename = "trash.delete")]
    TrashDelete,
    #[serde(rename = "system.ping")]
    SystemPing,
    #[serde(rename = "auth.request")]
    AuthRequest,
    #[serde(rename = "auth.refresh")]
    AuthRefresh,
    #[serde(rename = "artifact.send")]
    ArtifactSend,
}

impl AgentAction {
    /// Actions that must carry a document.
    pub fn requires_document(&self) -> bool {
        matches!(
            self,
            Self::TrustRequest
                | Self::TrustRespond
                | Self::TrustUpdate
                | Self::TrustDelete
                | Self::ArtifactSend
                | Self::AuthRequest
                | Self::AuthRefresh
                | Self::InboxSeen
                | Self::InboxDelete
                | Self::OutboxCancel
                | Self::DraftCreate
                | Self::DraftUpdate
                | Self::DraftDelete
                | Self::TrashDelete
        )
    }

    /// Actions answered on the originating connection. `trust.request` and
    /// `trust.respond` are relayed to the counterparty host instead.
    pub fn is_immediate(&self) -> bool {
        !matches!(self, Self::TrustRequest | Self::TrustRespond)
    }

    /// Actions a freshly bootstrapping agent may use before any trust record
    /// exists.
    pub fn allowed_without_trust(&self) -> bool {
        matches!(self, Self::AuthRequest)
    }
}

// ── Transporter documents ────────────────────────────────────────────────────

/// Document carried by a `TRUST_REQ` artifact.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRequestDocument {
    /// Display name of the requesting party.
    pub name: String,
    pub email: String,
    /// Why the sender wants to deliver documents to the receiver.
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Requested privacy for future documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_type: Option<PrivacyType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Document carried by a `TRUST_RES` artifact.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustResponseDocument {
    /// The decided status; `pending` is not a valid decision.
    pub decision: TrustStatus,
    pub decided_at: DateTime<Utc>,
    pub decided_by: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_type: Option<PrivacyType>,
}

/// Tabular line items on an invoice.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct LineItems {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Document carried by a `BTPS_DOC` artifact. The protocol validates shape
/// only; it never enforces business rules on the contents.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDocument {
    pub id: String,
    pub title: String,
    pub issued_at: DateTime<Utc>,
    pub status: String,
    pub total_amount: f64,
    pub currency: String,
    pub line_items: LineItems,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Agent documents ──────────────────────────────────────────────────────────

/// Document for `auth.request`: the device's fresh public key plus the
/// short-lived token handed out through a side channel. Never encrypted —
/// the server holds no decryption key for an unauthenticated agent.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequestDocument {
    pub identity: Identity,
    pub auth_token: String,
    /// PEM (SPKI) public key generated on the device.
    pub public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Value>,
}

/// Document for `auth.refresh`. A new public key rotates the agent's key in
/// its trust record.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRefreshDocument {
    pub identity: Identity,
    pub refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Value>,
}

/// Document for an agent-initiated `trust.request`: the counterparty the
/// user wants to reach plus the request payload the host will relay.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTrustRequestDocument {
    pub to: Identity,
    #[serde(flatten)]
    pub request: TrustRequestDocument,
}

/// Document for an agent-initiated `trust.respond`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTrustResponseDocument {
    pub to: Identity,
    #[serde(flatten)]
    pub response: TrustResponseDocument,
}

/// Document for `artifact.send`: the counterparty, the transporter type the
/// host will emit, and the payload. The payload's own schema is checked when
/// the outbound transporter artifact is built.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactSendDocument {
    pub to: Identity,
    #[serde(rename = "type")]
    pub artifact_type: crate::artifact::TransporterType,
    pub document: Value,
}

/// Document for mailbox mutations (`inbox.seen`, `inbox.delete`,
/// `outbox.cancel`, `trash.delete`): the artifact being acted on.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxMutationDocument {
    pub artifact_id: String,
}

/// Document for `trust.update` / `trust.delete`: the trust record acted on.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustMutationDocument {
    pub trust_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TrustStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}
