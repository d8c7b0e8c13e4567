//! Read-mostly TTL cache with single-flight refresh.
//!
//! N concurrent lookups for the same name issue at most one upstream query;
//! the rest wait on the in-flight guard and read the fresh entry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};

use btps_core::BtpsError;

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

pub struct TtlCache<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()), inflight: Mutex::new(HashMap::new()) }
    }

    /// Return the cached value for `key`, or run `fetch` to produce
    /// `(value, ttl)` and cache it. Entries past their TTL are refetched.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<T, BtpsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Duration), BtpsError>>,
    {
        if let Some(value) = self.fresh(key).await {
            return Ok(value);
        }

        let guard = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let _held = guard.lock().await;

        // Another waiter may have refreshed while we queued on the guard.
        if let Some(value) = self.fresh(key).await {
            return Ok(value);
        }

        let result = fetch().await;
        if let Ok((value, ttl)) = &result {
            let mut entries = self.entries.write().await;
            entries.insert(
                key.to_string(),
                Entry { value: value.clone(), expires_at: Instant::now() + *ttl },
            );
        }

        let mut inflight = self.inflight.lock().await;
        inflight.remove(key);

        result.map(|(value, _)| value)
    }

    /// Drop an entry, forcing the next lookup upstream.
    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn fresh(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone())
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_until_ttl_expiry() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v = cache
                .get_or_fetch("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(("hit".to_string(), Duration::from_secs(60)))
                })
                .await
                .unwrap();
            assert_eq!(v, "hit");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_refetch() {
        let cache = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok((1u32, Duration::ZERO))
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_lookups_single_flight() {
        let cache = Arc::new(TtlCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_fetch("same", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(("v".to_string(), Duration::from_secs(60)))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), "v");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        let err = cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BtpsError::ResolveDns("nxdomain".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RESOLVE_DNS");

        cache
            .get_or_fetch("k", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok((7u32, Duration::from_secs(60)))
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
