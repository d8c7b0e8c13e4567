use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use btps_core::{BtpsError, TokenRecord, TrustRecord};

use crate::contract::{TokenStore, TrustPatch, TrustStore};

// ── Trust ────────────────────────────────────────────────────────────────────

/// Process-local trust store. The default for tests and embedded hosts.
#[derive(Default)]
pub struct MemoryTrustStore {
    records: RwLock<HashMap<String, TrustRecord>>,
}

impl MemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustStore for MemoryTrustStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<TrustRecord>, BtpsError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn create(&self, record: TrustRecord) -> Result<TrustRecord, BtpsError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(BtpsError::InvalidConfig(format!(
                "trust record {} already exists",
                record.id
            )));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, patch: TrustPatch) -> Result<TrustRecord, BtpsError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| BtpsError::InvalidConfig(format!("trust record {id} not found")))?;
        patch.apply(record);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), BtpsError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn get_all(&self, receiver_id: Option<&str>) -> Result<Vec<TrustRecord>, BtpsError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| receiver_id.map(|rx| r.receiver_id == rx).unwrap_or(true))
            .cloned()
            .collect())
    }
}

// ── Tokens ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TokenIndexes {
    /// Primary index for hot-path validation.
    by_key: HashMap<(String, String), TokenRecord>,
    /// Secondary index for user-scoped enumeration and revocation.
    by_user: HashMap<String, HashSet<(String, String)>>,
}

/// Process-local token store with lazy expiry.
#[derive(Default)]
pub struct MemoryTokenStore {
    indexes: RwLock<TokenIndexes>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn remove_from(indexes: &mut TokenIndexes, key: &(String, String)) -> Option<TokenRecord> {
    let record = indexes.by_key.remove(key)?;
    if let Some(set) = indexes.by_user.get_mut(&record.user_identity) {
        set.remove(key);
        if set.is_empty() {
            indexes.by_user.remove(&record.user_identity);
        }
    }
    Some(record)
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn store(&self, record: TokenRecord) -> Result<(), BtpsError> {
        let mut indexes = self.indexes.write().await;
        let key = (record.holder.clone(), record.token.clone());
        indexes
            .by_user
            .entry(record.user_identity.clone())
            .or_default()
            .insert(key.clone());
        indexes.by_key.insert(key, record);
        Ok(())
    }

    async fn get(&self, holder: &str, token: &str) -> Result<Option<TokenRecord>, BtpsError> {
        let key = (holder.to_string(), token.to_string());
        let now = Utc::now();
        let indexes = self.indexes.read().await;
        Ok(indexes.by_key.get(&key).filter(|r| !r.is_expired(now)).cloned())
    }

    async fn remove(&self, holder: &str, token: &str) -> Result<(), BtpsError> {
        let key = (holder.to_string(), token.to_string());
        remove_from(&mut *self.indexes.write().await, &key);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize, BtpsError> {
        let now = Utc::now();
        let mut indexes = self.indexes.write().await;
        let expired: Vec<(String, String)> = indexes
            .by_key
            .iter()
            .filter(|(_, r)| r.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            remove_from(&mut indexes, key);
        }
        Ok(expired.len())
    }

    async fn tokens_by_user(&self, user_identity: &str) -> Result<Vec<TokenRecord>, BtpsError> {
        let now = Utc::now();
        let indexes = self.indexes.read().await;
        Ok(indexes
            .by_user
            .get(user_identity)
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| indexes.by_key.get(k))
                    .filter(|r| !r.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn revoke_all_for_user(&self, user_identity: &str) -> Result<usize, BtpsError> {
        let mut indexes = self.indexes.write().await;
        let keys: Vec<(String, String)> = indexes
            .by_user
            .remove(user_identity)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            indexes.by_key.remove(key);
        }
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use btps_core::trust::{PrivacyType, TrustStatus};
    use btps_core::trust_id;
    use chrono::Duration;

    fn trust_record(sender: &str, receiver: &str) -> TrustRecord {
        TrustRecord {
            id: trust_id(sender, receiver),
            sender_id: sender.into(),
            receiver_id: receiver.into(),
            status: TrustStatus::Pending,
            created_at: Utc::now(),
            decided_by: None,
            decided_at: None,
            expires_at: None,
            public_key_pem: "PEM".into(),
            public_key_fingerprint: "fp".into(),
            key_history: Vec::new(),
            privacy_type: PrivacyType::Unencrypted,
            metadata: None,
        }
    }

    fn token(holder: &str, token: &str, user: &str, ttl_secs: i64) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            token: token.into(),
            holder: holder.into(),
            user_identity: user.into(),
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            decrypt_by: user.into(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn trust_crud_round_trip() {
        let store = MemoryTrustStore::new();
        let record = trust_record("alice$a.com", "bob$b.com");
        let id = record.id.clone();

        store.create(record.clone()).await.unwrap();
        assert!(store.create(record).await.is_err(), "duplicate id must fail");

        let fetched = store.get_by_id(&id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TrustStatus::Pending);

        let updated = store
            .update(
                &id,
                TrustPatch {
                    status: Some(TrustStatus::Accepted),
                    decided_by: Some("bob$b.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, TrustStatus::Accepted);
        assert_eq!(updated.decided_by.as_deref(), Some("bob$b.com"));

        store.delete(&id).await.unwrap();
        assert!(store.get_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_all_filters_by_receiver() {
        let store = MemoryTrustStore::new();
        store.create(trust_record("a$a.com", "bob$b.com")).await.unwrap();
        store.create(trust_record("c$c.com", "bob$b.com")).await.unwrap();
        store.create(trust_record("a$a.com", "dan$d.com")).await.unwrap();

        assert_eq!(store.get_all(Some("bob$b.com")).await.unwrap().len(), 2);
        assert_eq!(store.get_all(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expired_tokens_are_invisible_before_cleanup() {
        let store = MemoryTokenStore::new();
        store.store(token("h", "t1", "u$x.com", -5)).await.unwrap();
        store.store(token("h", "t2", "u$x.com", 300)).await.unwrap();

        assert!(store.get("h", "t1").await.unwrap().is_none());
        assert!(store.get("h", "t2").await.unwrap().is_some());

        assert_eq!(store.cleanup().await.unwrap(), 1);
        assert_eq!(store.tokens_by_user("u$x.com").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn revoke_all_clears_both_indexes() {
        let store = MemoryTokenStore::new();
        store.store(token("agent1", "t1", "u$x.com", 300)).await.unwrap();
        store.store(token("agent2", "t2", "u$x.com", 300)).await.unwrap();
        store.store(token("agent3", "t3", "other$y.com", 300)).await.unwrap();

        assert_eq!(store.revoke_all_for_user("u$x.com").await.unwrap(), 2);
        assert!(store.get("agent1", "t1").await.unwrap().is_none());
        assert!(store.get("agent3", "t3").await.unwrap().is_some());
    }
}
