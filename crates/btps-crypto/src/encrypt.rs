//! Hybrid document encryption.
//!
//! A fresh 256-bit symmetric key encrypts the canonical document bytes
//! (AES-256-GCM by default, AES-256-CBC accepted for compatibility); the
//! symmetric key is RSA-OAEP-SHA256-wrapped to the recipient. In
//! `standardEncrypt` mode the wrapping key is the recipient's published
//! identity key; in `2faEncrypt` mode it is the session-bound second-factor
//! key, so the published key alone cannot decrypt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use btps_core::artifact::{EncryptionAlgorithm, EncryptionBlock, EncryptionMode};
use btps_core::BtpsError;

use crate::canonical::canonical_bytes;
use crate::keys::{BtpsKeyPair, PublicKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const GCM_TAG_LEN: usize = 16;

/// Encrypt `document` to `recipient_pem`, returning the base64 ciphertext
/// that replaces the document on the wire plus the encryption block.
pub fn encrypt_document(
    document: &Value,
    recipient_pem: &str,
    mode: EncryptionMode,
    algorithm: EncryptionAlgorithm,
) -> Result<(String, EncryptionBlock), BtpsError> {
    let recipient = match PublicKey::from_pem(recipient_pem)? {
        PublicKey::Rsa(key) => key,
        other => {
            return Err(BtpsError::UnsupportedEncrypt(format!(
                "recipient key is {}, RSA required for key wrapping",
                other.key_type().as_str()
            )))
        }
    };

    let plaintext = canonical_bytes(document);
    let mut rng = rand::thread_rng();

    let mut key = Zeroizing::new([0u8; 32]);
    rng.fill_bytes(key.as_mut());

    let (ciphertext, iv, auth_tag) = match algorithm {
        EncryptionAlgorithm::Aes256Gcm => {
            let mut nonce = [0u8; 12];
            rng.fill_bytes(&mut nonce);
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key.as_ref()));
            let mut sealed = cipher
                .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
                .map_err(|_| BtpsError::UnsupportedEncrypt("AES-GCM encryption failed".into()))?;
            // aes-gcm appends the tag; the wire carries it separately.
            let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);
            (sealed, nonce.to_vec(), Some(BASE64.encode(tag)))
        }
        EncryptionAlgorithm::Aes256Cbc => {
            let mut iv = [0u8; 16];
            rng.fill_bytes(&mut iv);
            let cipher = Aes256CbcEnc::new_from_slices(key.as_ref(), &iv)
                .map_err(|e| BtpsError::UnsupportedEncrypt(e.to_string()))?;
            let sealed = cipher.encrypt_padded_vec_mut::<Pkcs7>(&plaintext);
            (sealed, iv.to_vec(), None)
        }
    };

    let wrapped_key = recipient
        .encrypt(&mut rng, rsa::Oaep::new::<Sha256>(), key.as_ref())
        .map_err(|e| BtpsError::UnsupportedEncrypt(format!("RSA-OAEP wrap failed: {e}")))?;

    let block = EncryptionBlock {
        algorithm,
        mode,
        encrypted_key: BASE64.encode(wrapped_key),
        iv: BASE64.encode(iv),
        auth_tag,
    };
    Ok((BASE64.encode(ciphertext), block))
}

/// Unwrap and decrypt an encrypted document with the recipient's keypair.
///
/// A wrapped key that does not open under this keypair means the artifact
/// was encrypted to someone else: `DECRYPTION_UNINTENDED`.
pub fn decrypt_document(
    ciphertext_b64: &str,
    block: &EncryptionBlock,
    keypair: &BtpsKeyPair,
) -> Result<Value, BtpsError> {
    let private = match keypair {
        BtpsKeyPair::Rsa { private, .. } => private,
        _ => {
            return Err(BtpsError::UnsupportedEncrypt(
                "decryption requires an RSA keypair".into(),
            ))
        }
    };

    let wrapped = decode_b64("encryptedKey", &block.encrypted_key)?;
    let iv = decode_b64("iv", &block.iv)?;
    let ciphertext = decode_b64("document", ciphertext_b64)?;

    let key = Zeroizing::new(
        private
            .decrypt(rsa::Oaep::new::<Sha256>(), &wrapped)
            .map_err(|_| BtpsError::DecryptionUnintended)?,
    );
    if key.len() != 32 {
        return Err(BtpsError::DecryptionUnintended);
    }

    let plaintext = match block.algorithm {
        EncryptionAlgorithm::Aes256Gcm => {
            let tag_b64 = block
                .auth_tag
                .as_ref()
                .ok_or_else(|| BtpsError::UnsupportedEncrypt("GCM requires authTag".into()))?;
            let tag = decode_b64("authTag", tag_b64)?;
            if iv.len() != 12 {
                return Err(BtpsError::UnsupportedEncrypt("GCM iv must be 12 bytes".into()));
            }
            let mut sealed = ciphertext;
            sealed.extend_from_slice(&tag);
            let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&key));
            cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| BtpsError::DecryptionUnintended)?
        }
        EncryptionAlgorithm::Aes256Cbc => {
            if iv.len() != 16 {
                return Err(BtpsError::UnsupportedEncrypt("CBC iv must be 16 bytes".into()));
            }
            let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
                .map_err(|e| BtpsError::UnsupportedEncrypt(e.to_string()))?;
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                .map_err(|_| BtpsError::DecryptionUnintended)?
        }
    };

    serde_json::from_slice(&plaintext).map_err(|e| BtpsError::InvalidJson(e.to_string()))
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, BtpsError> {
    BASE64
        .decode(value)
        .map_err(|e| BtpsError::UnsupportedEncrypt(format!("invalid base64 {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::keys::tests::RSA_PAIR;

    fn recipient_pem() -> String {
        RSA_PAIR.public_key_pem().unwrap()
    }

    #[test]
    fn gcm_round_trip() {
        let doc = json!({ "id": "inv-1", "totalAmount": 150.5, "currency": "USD" });
        let (ciphertext, block) = encrypt_document(
            &doc,
            &recipient_pem(),
            EncryptionMode::Standard,
            EncryptionAlgorithm::Aes256Gcm,
        )
        .unwrap();
        assert!(block.auth_tag.is_some());

        let back = decrypt_document(&ciphertext, &block, &RSA_PAIR).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn cbc_round_trip() {
        let doc = json!({ "legacy": true });
        let (ciphertext, block) = encrypt_document(
            &doc,
            &recipient_pem(),
            EncryptionMode::Standard,
            EncryptionAlgorithm::Aes256Cbc,
        )
        .unwrap();
        assert!(block.auth_tag.is_none());

        let back = decrypt_document(&ciphertext, &block, &RSA_PAIR).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn unintended_recipient_cannot_decrypt() {
        let doc = json!({ "secret": 1 });
        let (ciphertext, block) = encrypt_document(
            &doc,
            &recipient_pem(),
            EncryptionMode::Standard,
            EncryptionAlgorithm::Aes256Gcm,
        )
        .unwrap();

        let other = BtpsKeyPair::generate_rsa().unwrap();
        let err = decrypt_document(&ciphertext, &block, &other).unwrap_err();
        assert_eq!(err.code(), "DECRYPTION_UNINTENDED");
    }

    #[test]
    fn non_rsa_recipient_is_unsupported() {
        let ed = BtpsKeyPair::generate_ed25519();
        let err = encrypt_document(
            &json!({}),
            &ed.public_key_pem().unwrap(),
            EncryptionMode::Standard,
            EncryptionAlgorithm::Aes256Gcm,
        )
        .unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ENCRYPT");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let (ciphertext, block) = encrypt_document(
            &json!({ "n": 7 }),
            &recipient_pem(),
            EncryptionMode::Standard,
            EncryptionAlgorithm::Aes256Gcm,
        )
        .unwrap();
        let mut bytes = BASE64.decode(&ciphertext).unwrap();
        if let Some(b) = bytes.first_mut() {
            *b ^= 0xff;
        }
        let tampered = BASE64.encode(bytes);
        assert!(decrypt_document(&tampered, &block, &RSA_PAIR).is_err());
    }
}
