use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use btps_core::{BtpsError, Identity};
use btps_crypto::keys::KeyType;

/// One published key under a selector.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyEntry {
    pub selector: String,
    /// PEM (SPKI).
    pub public_key: String,
    pub key_type: KeyType,
    pub version: u32,
    pub created_at: DateTime<Utc>,
}

/// An identity's full key record: every live selector plus which one new
/// artifacts should be signed under.
///
/// Selectors are never deleted while an outstanding artifact might still
/// reference them; rotation appends a new entry and then switches
/// `current_selector`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeyRecord {
    pub identity: Identity,
    pub current_selector: String,
    pub public_keys: Vec<PublicKeyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl IdentityKeyRecord {
    /// Create a record with a single selector.
    pub fn new(identity: Identity, entry: PublicKeyEntry) -> Self {
        Self {
            identity,
            current_selector: entry.selector.clone(),
            public_keys: vec![entry],
            metadata: None,
        }
    }

    /// The invariant every store and host must uphold.
    pub fn validate(&self) -> Result<(), BtpsError> {
        if self.public_keys.is_empty() {
            return Err(BtpsError::InvalidConfig(format!(
                "key record for {} has no public keys",
                self.identity
            )));
        }
        if self.key_for(&self.current_selector).is_none() {
            return Err(BtpsError::InvalidConfig(format!(
                "current selector '{}' missing from key record for {}",
                self.current_selector, self.identity
            )));
        }
        Ok(())
    }

    pub fn key_for(&self, selector: &str) -> Option<&PublicKeyEntry> {
        self.public_keys.iter().find(|e| e.selector == selector)
    }

    pub fn current_key(&self) -> Option<&PublicKeyEntry> {
        self.key_for(&self.current_selector)
    }

    /// Append a new selector and make it current. The prior selector stays
    /// resolvable for in-flight artifacts.
    pub fn rotate(&mut self, entry: PublicKeyEntry) {
        self.current_selector = entry.selector.clone();
        self.public_keys.retain(|e| e.selector != entry.selector);
        self.public_keys.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(selector: &str) -> PublicKeyEntry {
        PublicKeyEntry {
            selector: selector.into(),
            public_key: "-----BEGIN PUBLIC KEY-----\nAA==\n-----END PUBLIC KEY-----\n".into(),
            key_type: KeyType::Rsa,
            version: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn rotation_keeps_old_selectors_resolvable() {
        let identity = Identity::parse("alice$a.com").unwrap();
        let mut record = IdentityKeyRecord::new(identity, entry("btps1"));
        record.rotate(entry("btps2"));

        assert_eq!(record.current_selector, "btps2");
        assert!(record.key_for("btps1").is_some());
        assert!(record.key_for("btps2").is_some());
        record.validate().unwrap();
    }

    #[test]
    fn current_selector_must_exist() {
        let identity = Identity::parse("alice$a.com").unwrap();
        let mut record = IdentityKeyRecord::new(identity, entry("btps1"));
        record.current_selector = "missing".into();
        assert!(record.validate().is_err());
    }
}
