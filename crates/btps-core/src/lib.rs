//! btps-core — the BTPS protocol data model.
//!
//! Identities, the artifact union and its schema validation, trust and token
//! records, server response shapes, and the protocol error taxonomy. Every
//! other crate in the workspace builds on these types; this crate performs no
//! I/O and holds no keys.

pub mod artifact;
pub mod constants;
pub mod document;
pub mod error;
pub mod identity;
pub mod response;
pub mod token;
pub mod trust;
pub mod validate;

pub use artifact::{
    AgentArtifact, Attestation, ControlAction, ControlArtifact, Delegation, EncryptionAlgorithm,
    EncryptionBlock, EncryptionMode, IdentityLookupArtifact, ServerArtifact, SignatureBlock,
    TransporterArtifact, TransporterType,
};
pub use document::{AgentAction, InvoiceDocument, TrustRequestDocument, TrustResponseDocument};
pub use error::BtpsError;
pub use identity::Identity;
pub use response::{BtpsResponse, ResponseStatus, ResponseType};
pub use token::TokenRecord;
pub use trust::{trust_id, KeyHistoryEntry, PrivacyType, TrustRecord, TrustStatus};
pub use validate::validate_artifact;
