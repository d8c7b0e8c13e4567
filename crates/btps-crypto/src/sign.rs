//! Detached signatures over canonical JSON.
//!
//! The signed payload is always the artifact with its `signature` field
//! removed, rendered through [`crate::canonical`]. Verification gates on the
//! fingerprint before any signature math: a key that is not the one the
//! signer claimed fails fast with `SIG_MISMATCH`.

use serde_json::Value;

use btps_core::artifact::{HashAlgorithm, SignatureBlock};
use btps_core::BtpsError;

use crate::canonical::canonical_bytes;
use crate::keys::{BtpsKeyPair, PublicKey};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Sign `payload` (an artifact minus its `signature` field) and produce the
/// wire signature block.
pub fn sign_payload(payload: &Value, keypair: &BtpsKeyPair) -> Result<SignatureBlock, BtpsError> {
    let bytes = canonical_bytes(payload);
    let signature = keypair.sign(&bytes)?;
    Ok(SignatureBlock {
        algorithm_hash: HashAlgorithm::Sha256,
        value: BASE64.encode(signature),
        fingerprint: keypair.public_key().fingerprint()?,
    })
}

/// Verify `signature` over `payload` against the resolved `public_key_pem`.
pub fn verify_payload(
    payload: &Value,
    signature: &SignatureBlock,
    public_key_pem: &str,
) -> Result<(), BtpsError> {
    let key = PublicKey::from_pem(public_key_pem)?;
    if key.fingerprint()? != signature.fingerprint {
        return Err(BtpsError::SigMismatch);
    }
    let sig_bytes = BASE64
        .decode(&signature.value)
        .map_err(|e| BtpsError::SigVerification(format!("invalid base64 signature: {e}")))?;
    key.verify(&canonical_bytes(payload), &sig_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::keys::tests::RSA_PAIR;

    #[test]
    fn sign_then_verify_is_identity() {
        let payload = json!({
            "id": "a1",
            "from": "alice$a.com",
            "document": { "b": 2, "a": 1 },
        });
        let block = sign_payload(&payload, &RSA_PAIR).unwrap();
        assert_eq!(block.algorithm_hash, HashAlgorithm::Sha256);
        let pem = RSA_PAIR.public_key_pem().unwrap();
        verify_payload(&payload, &block, &pem).unwrap();
    }

    #[test]
    fn key_order_of_the_payload_does_not_matter() {
        let signed = json!({ "z": 1, "a": { "y": 2, "x": 3 } });
        let reordered: Value =
            serde_json::from_str(r#"{"a":{"x":3,"y":2},"z":1}"#).unwrap();
        let block = sign_payload(&signed, &RSA_PAIR).unwrap();
        let pem = RSA_PAIR.public_key_pem().unwrap();
        verify_payload(&reordered, &block, &pem).unwrap();
    }

    #[test]
    fn wrong_key_fails_with_mismatch_before_verification() {
        let payload = json!({ "id": "a1" });
        let block = sign_payload(&payload, &RSA_PAIR).unwrap();
        let other = BtpsKeyPair::generate_ed25519();
        let err = verify_payload(&payload, &block, &other.public_key_pem().unwrap()).unwrap_err();
        assert_eq!(err.code(), "SIG_MISMATCH");
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let payload = json!({ "amount": 100 });
        let block = sign_payload(&payload, &RSA_PAIR).unwrap();
        let pem = RSA_PAIR.public_key_pem().unwrap();
        let err = verify_payload(&json!({ "amount": 999 }), &block, &pem).unwrap_err();
        assert_eq!(err.code(), "SIG_VERIFICATION");
    }

    #[test]
    fn ed25519_signatures_verify_too() {
        let pair = BtpsKeyPair::generate_ed25519();
        let payload = json!({ "id": "a2" });
        let block = sign_payload(&payload, &pair).unwrap();
        verify_payload(&payload, &block, &pair.public_key_pem().unwrap()).unwrap();
    }
}
