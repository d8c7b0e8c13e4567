use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::artifact::{EncryptionBlock, SignatureBlock};
use crate::constants::PROTOCOL_VERSION;
use crate::error::BtpsError;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ResponseType {
    #[serde(rename = "btps_response")]
    Response,
    #[serde(rename = "btps_error")]
    Error,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub ok: bool,
    pub code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The single response frame the server writes per request line.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BtpsResponse {
    pub version: String,
    pub status: ResponseStatus,
    pub id: String,
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    /// Id of the request artifact this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<String>,
}

impl BtpsResponse {
    /// A 200 acknowledgement for `req_id`.
    pub fn ok(req_id: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            status: ResponseStatus { ok: true, code: 200, message: None },
            id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            response_type: ResponseType::Response,
            req_id: Some(req_id.into()),
            document: None,
            signature: None,
            encryption: None,
            signed_by: None,
        }
    }

    /// A 200 response carrying a result document.
    pub fn ok_with_document(req_id: impl Into<String>, document: Value) -> Self {
        Self { document: Some(document), ..Self::ok(req_id) }
    }

    /// A `btps_error` frame for a typed protocol error. The message embeds
    /// the stable error code so callers can match without parsing prose.
    pub fn error(req_id: Option<String>, err: &BtpsError) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            status: ResponseStatus {
                ok: false,
                code: err.status_code(),
                message: Some(format!("{}: {err}", err.code())),
            },
            id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            response_type: ResponseType::Error,
            req_id,
            document: None,
            signature: None,
            encryption: None,
            signed_by: None,
        }
    }

    /// An error frame with an explicit status code and message, for
    /// middleware that answers outside the typed taxonomy.
    pub fn error_with_code(req_id: Option<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            status: ResponseStatus { ok: false, code, message: Some(message.into()) },
            id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
            response_type: ResponseType::Error,
            req_id,
            document: None,
            signature: None,
            encryption: None,
            signed_by: None,
        }
    }
}
