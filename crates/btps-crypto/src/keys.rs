use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey as _, DecodePublicKey as _, EncodePublicKey as _};
use rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use btps_core::BtpsError;

/// Published key algorithm, as advertised in DNS `k=` tokens.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Rsa,
    Ed25519,
    Ecdsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
            Self::Ecdsa => "ecdsa",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rsa" => Some(Self::Rsa),
            "ed25519" => Some(Self::Ed25519),
            "ecdsa" => Some(Self::Ecdsa),
            _ => None,
        }
    }
}

// ── Public keys ──────────────────────────────────────────────────────────────

/// A resolved public key, parsed from PEM (SPKI).
#[derive(Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    /// Parse a PEM SPKI public key, accepting RSA or Ed25519 material.
    ///
    /// ECDSA-typed records are advertised in DNS but not yet verifiable; they
    /// parse as neither variant and fail here.
    pub fn from_pem(pem: &str) -> Result<Self, BtpsError> {
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(Self::Rsa(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
            return Ok(Self::Ed25519(key));
        }
        Err(BtpsError::ResolvePubkey("unparseable SPKI public key".into()))
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// DER (SPKI) encoding, the input to fingerprinting.
    pub fn spki_der(&self) -> Result<Vec<u8>, BtpsError> {
        let doc = match self {
            Self::Rsa(key) => key
                .to_public_key_der()
                .map_err(|e| BtpsError::Unknown(format!("SPKI encoding failed: {e}")))?,
            Self::Ed25519(key) => key
                .to_public_key_der()
                .map_err(|e| BtpsError::Unknown(format!("SPKI encoding failed: {e}")))?,
        };
        Ok(doc.as_bytes().to_vec())
    }

    /// base64(SHA-256(SPKI DER)) — the fingerprint carried in signature
    /// blocks and trust records.
    pub fn fingerprint(&self) -> Result<String, BtpsError> {
        let der = self.spki_der()?;
        Ok(BASE64.encode(Sha256::digest(&der)))
    }

    pub fn to_pem(&self) -> Result<String, BtpsError> {
        match self {
            Self::Rsa(key) => key.to_public_key_pem(LineEnding::LF),
            Self::Ed25519(key) => key.to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| BtpsError::Unknown(format!("PEM encoding failed: {e}")))
    }

    /// Verify a detached signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), BtpsError> {
        match self {
            Self::Rsa(key) => {
                let verifying = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key.clone());
                let sig = rsa::pkcs1v15::Signature::try_from(signature)
                    .map_err(|e| BtpsError::SigVerification(e.to_string()))?;
                verifying
                    .verify(message, &sig)
                    .map_err(|e| BtpsError::SigVerification(e.to_string()))
            }
            Self::Ed25519(key) => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|e| BtpsError::SigVerification(e.to_string()))?;
                key.verify(message, &sig)
                    .map_err(|e| BtpsError::SigVerification(e.to_string()))
            }
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.key_type().as_str())
    }
}

// ── Keypairs ─────────────────────────────────────────────────────────────────

/// A signing keypair. Secret material never appears in `Debug` output and
/// zeroizes on drop inside the underlying key types.
pub enum BtpsKeyPair {
    Rsa { private: RsaPrivateKey, public: RsaPublicKey },
    Ed25519(ed25519_dalek::SigningKey),
}

impl BtpsKeyPair {
    /// Generate a fresh 2048-bit RSA keypair, the default identity key kind
    /// (RSA is required for any identity that receives encrypted documents).
    pub fn generate_rsa() -> Result<Self, BtpsError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048)
            .map_err(|e| BtpsError::Unknown(format!("RSA key generation failed: {e}")))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self::Rsa { private, public })
    }

    pub fn generate_ed25519() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng))
    }

    /// Load from a PKCS#8 PEM private key.
    pub fn from_private_key_pem(pem: &str) -> Result<Self, BtpsError> {
        if let Ok(private) = RsaPrivateKey::from_pkcs8_pem(pem) {
            let public = RsaPublicKey::from(&private);
            return Ok(Self::Rsa { private, public });
        }
        if let Ok(signing) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self::Ed25519(signing));
        }
        Err(BtpsError::InvalidConfig("unparseable PKCS#8 private key".into()))
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa { .. } => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            Self::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            Self::Ed25519(signing) => PublicKey::Ed25519(signing.verifying_key()),
        }
    }

    pub fn public_key_pem(&self) -> Result<String, BtpsError> {
        self.public_key().to_pem()
    }

    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, BtpsError> {
        match self {
            Self::Rsa { private, .. } => private.to_pkcs8_pem(LineEnding::LF),
            Self::Ed25519(signing) => {
                use ed25519_dalek::pkcs8::EncodePrivateKey as _;
                signing.to_pkcs8_pem(LineEnding::LF)
            }
        }
        .map_err(|e| BtpsError::Unknown(format!("PEM encoding failed: {e}")))
    }

    /// Sign `message`, returning raw signature bytes.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, BtpsError> {
        match self {
            Self::Rsa { private, .. } => {
                let signing = rsa::pkcs1v15::SigningKey::<Sha256>::new(private.clone());
                let sig: rsa::pkcs1v15::Signature = signing
                    .try_sign(message)
                    .map_err(|e| BtpsError::SigVerification(e.to_string()))?;
                Ok(sig.to_vec())
            }
            Self::Ed25519(signing) => {
                use ed25519_dalek::Signer as _;
                Ok(signing.sign(message).to_vec())
            }
        }
    }
}

impl fmt::Debug for BtpsKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BtpsKeyPair({})", self.key_type().as_str())
    }
}
