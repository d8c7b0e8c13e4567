//! btps-crypto — cryptographic primitives for BTPS.
//!
//! Canonical JSON (the single authority for what bytes are signed), keypair
//! handling with SPKI fingerprints, detached signatures, hybrid
//! AES + RSA-OAEP document encryption, and token generation.

pub mod canonical;
pub mod encrypt;
pub mod keys;
pub mod sign;
pub mod token;

pub use canonical::{canonical_bytes, to_canonical_json};
pub use encrypt::{decrypt_document, encrypt_document};
pub use keys::{BtpsKeyPair, KeyType, PublicKey};
pub use sign::{sign_payload, verify_payload};
pub use token::{generate_agent_id, generate_auth_token, generate_refresh_token};
