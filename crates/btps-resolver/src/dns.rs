//! The resolver contract and its drivers.
//!
//! [`KeyResolver`] is the seam the pipeline verifies through; the production
//! driver speaks DNS via hickory, and [`StaticResolver`] serves a fixed
//! table for tests and single-host deployments.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hickory_resolver::TokioResolver;
use tracing::debug;

use btps_core::{BtpsError, Identity};

use crate::cache::TtlCache;
use crate::record::IdentityKeyRecord;
use crate::txt::{host_record_name, key_record_name, parse_host_record, parse_key_record, HostEndpoint};

/// Identity discovery: where does this identity receive artifacts, and what
/// key did it publish under a given selector.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Locate the inbox endpoint for the identity's domain. The returned
    /// selector is the one the host currently advertises for signing.
    async fn resolve_host(&self, identity: &Identity) -> Result<HostEndpoint, BtpsError>;

    /// Fetch the PEM public key published under `(identity, selector)`.
    async fn resolve_public_key(
        &self,
        identity: &Identity,
        selector: &str,
    ) -> Result<String, BtpsError>;
}

// ── DNS driver ───────────────────────────────────────────────────────────────

/// hickory-backed resolver with per-record TTL caching.
pub struct DnsResolver {
    resolver: TokioResolver,
    host_cache: TtlCache<HostEndpoint>,
    key_cache: TtlCache<String>,
}

impl DnsResolver {
    /// Build against the system resolver configuration.
    pub fn from_system_conf() -> Result<Self, BtpsError> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| BtpsError::InvalidConfig(format!("resolver config: {e}")))?
            .build();
        Ok(Self {
            resolver,
            host_cache: TtlCache::new(),
            key_cache: TtlCache::new(),
        })
    }

    async fn txt_strings(&self, name: &str) -> Result<(Vec<String>, Duration), BtpsError> {
        let lookup = self.resolver.txt_lookup(name.to_string()).await.map_err(|e| {
            if e.is_no_records_found() {
                BtpsError::ResolveDns(format!("{name}: no TXT records"))
            } else {
                BtpsError::ResolveDns(format!("{name}: {e}"))
            }
        })?;
        let ttl = lookup
            .as_lookup()
            .valid_until()
            .saturating_duration_since(Instant::now());
        let strings = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect();
        Ok((strings, ttl))
    }
}

#[async_trait]
impl KeyResolver for DnsResolver {
    async fn resolve_host(&self, identity: &Identity) -> Result<HostEndpoint, BtpsError> {
        let name = host_record_name(identity.domain());
        self.host_cache
            .get_or_fetch(&name, || async {
                let (records, ttl) = self.txt_strings(&name).await?;
                let endpoint = records
                    .iter()
                    .find_map(|r| parse_host_record(r))
                    .ok_or_else(|| BtpsError::ResolveDns(format!("{name}: no BTP1 record")))?;
                debug!(%name, host = %endpoint.host, port = endpoint.port, "resolved host");
                Ok((endpoint, ttl))
            })
            .await
    }

    async fn resolve_public_key(
        &self,
        identity: &Identity,
        selector: &str,
    ) -> Result<String, BtpsError> {
        let name = key_record_name(identity.username(), identity.domain(), selector);
        self.key_cache
            .get_or_fetch(&name, || async {
                let (records, ttl) = match self.txt_strings(&name).await {
                    Ok(found) => found,
                    // A missing selector name is an absent selector, not a
                    // transport failure.
                    Err(BtpsError::ResolveDns(msg)) if msg.contains("no TXT records") => {
                        return Err(BtpsError::SelectorNotFound {
                            identity: identity.to_string(),
                            selector: selector.to_string(),
                        })
                    }
                    Err(e) => return Err(e),
                };
                let (_, pem) = records
                    .iter()
                    .find_map(|r| parse_key_record(r))
                    .ok_or_else(|| BtpsError::ResolvePubkey(name.clone()))?;
                debug!(%name, "resolved public key");
                Ok((pem, ttl))
            })
            .await
    }
}

// ── Static driver ────────────────────────────────────────────────────────────

/// Serves hosts and keys from an in-process table.
#[derive(Default)]
pub struct StaticResolver {
    hosts: RwLock<HashMap<String, HostEndpoint>>,
    keys: RwLock<HashMap<(String, String), String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_host(&self, domain: &str, endpoint: HostEndpoint) {
        self.hosts.write().expect("resolver lock poisoned").insert(domain.to_string(), endpoint);
    }

    /// Publish a key under `(identity, selector)`.
    pub fn add_key(&self, identity: &Identity, selector: &str, pem: &str) {
        self.keys
            .write()
            .expect("resolver lock poisoned")
            .insert((identity.to_string(), selector.to_string()), pem.to_string());
    }

    /// Publish every selector of a key record.
    pub fn add_record(&self, record: &IdentityKeyRecord) {
        for entry in &record.public_keys {
            self.add_key(&record.identity, &entry.selector, &entry.public_key);
        }
    }

    /// Remove one published selector, simulating record expiry.
    pub fn remove_key(&self, identity: &Identity, selector: &str) {
        self.keys
            .write()
            .expect("resolver lock poisoned")
            .remove(&(identity.to_string(), selector.to_string()));
    }
}

#[async_trait]
impl KeyResolver for StaticResolver {
    async fn resolve_host(&self, identity: &Identity) -> Result<HostEndpoint, BtpsError> {
        self.hosts
            .read()
            .expect("resolver lock poisoned")
            .get(identity.domain())
            .cloned()
            .ok_or_else(|| BtpsError::ResolveDns(identity.domain().to_string()))
    }

    async fn resolve_public_key(
        &self,
        identity: &Identity,
        selector: &str,
    ) -> Result<String, BtpsError> {
        self.keys
            .read()
            .expect("resolver lock poisoned")
            .get(&(identity.to_string(), selector.to_string()))
            .cloned()
            .ok_or_else(|| BtpsError::SelectorNotFound {
                identity: identity.to_string(),
                selector: selector.to_string(),
            })
    }
}
