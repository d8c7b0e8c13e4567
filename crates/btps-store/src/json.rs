//! File-backed trust store.
//!
//! One JSON document of shape `{"trustRecords": [...]}` holds every record.
//! Mutations land in memory and mark the store dirty; a debounced task
//! flushes by writing a temp file and renaming it into place while holding
//! an exclusive advisory lock on the store file. External modifications are
//! detected by mtime and reloaded on the next read. Dropping the store
//! flushes synchronously so a clean shutdown never loses a decided trust.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use btps_core::{BtpsError, TrustRecord};

use crate::contract::{TrustPatch, TrustStore};

#[derive(Clone, Debug)]
pub struct JsonStoreConfig {
    pub path: PathBuf,
    /// How long to coalesce writes before flushing.
    pub debounce: Duration,
}

impl JsonStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), debounce: Duration::from_millis(500) }
    }
}

#[derive(Serialize, Deserialize, Default)]
struct Document {
    #[serde(rename = "trustRecords")]
    trust_records: Vec<TrustRecord>,
}

struct State {
    records: HashMap<String, TrustRecord>,
    /// mtime of the file as of the last load or flush.
    loaded_mtime: Option<SystemTime>,
}

struct Inner {
    config: JsonStoreConfig,
    state: RwLock<State>,
    dirty: AtomicBool,
    flush_scheduled: AtomicBool,
}

/// JSON-document trust store driver.
#[derive(Clone)]
pub struct JsonTrustStore {
    inner: Arc<Inner>,
}

impl JsonTrustStore {
    pub fn open(config: JsonStoreConfig) -> Result<Self, BtpsError> {
        let records = if config.path.exists() {
            let text = fs::read_to_string(&config.path)
                .map_err(|e| BtpsError::InvalidConfig(format!("reading trust store: {e}")))?;
            let doc: Document = serde_json::from_str(&text)
                .map_err(|e| BtpsError::InvalidConfig(format!("parsing trust store: {e}")))?;
            doc.trust_records.into_iter().map(|r| (r.id.clone(), r)).collect()
        } else {
            HashMap::new()
        };
        let loaded_mtime = file_mtime(&config.path);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(State { records, loaded_mtime }),
                dirty: AtomicBool::new(false),
                flush_scheduled: AtomicBool::new(false),
            }),
        })
    }

    /// Flush pending writes now instead of waiting out the debounce.
    pub fn flush(&self) -> Result<(), BtpsError> {
        self.inner.flush()
    }

    fn mark_dirty(&self) {
        let inner = &self.inner;
        inner.dirty.store(true, Ordering::SeqCst);
        if inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.debounce).await;
            inner.flush_scheduled.store(false, Ordering::SeqCst);
            if let Err(e) = inner.flush() {
                warn!(error = %e, "debounced trust store flush failed");
            }
        });
    }

    /// Reload from disk when someone else rewrote the file under us. Skipped
    /// while dirty: our pending state wins and the flush will overwrite.
    fn maybe_reload(&self) {
        if self.inner.dirty.load(Ordering::SeqCst) {
            return;
        }
        let disk_mtime = file_mtime(&self.inner.config.path);
        let stale = {
            let state = self.inner.state.read().expect("trust store lock poisoned");
            disk_mtime.is_some() && disk_mtime != state.loaded_mtime
        };
        if !stale {
            return;
        }
        match fs::read_to_string(&self.inner.config.path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Document>(&text).map_err(|e| e.to_string()))
        {
            Ok(doc) => {
                let mut state = self.inner.state.write().expect("trust store lock poisoned");
                state.records = doc.trust_records.into_iter().map(|r| (r.id.clone(), r)).collect();
                state.loaded_mtime = disk_mtime;
                debug!(path = %self.inner.config.path.display(), "reloaded externally modified trust store");
            }
            Err(e) => warn!(error = %e, "failed to reload trust store"),
        }
    }
}

impl Inner {
    fn flush(&self) -> Result<(), BtpsError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let json = {
            let state = self.state.read().expect("trust store lock poisoned");
            let mut records: Vec<TrustRecord> = state.records.values().cloned().collect();
            records.sort_by(|a, b| a.id.cmp(&b.id));
            serde_json::to_string_pretty(&Document { trust_records: records })
                .map_err(|e| BtpsError::Unknown(format!("serializing trust store: {e}")))?
        };

        let _lock = FileLock::acquire(&self.config.path)?;
        let tmp = self.config.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| BtpsError::InvalidConfig(format!("writing trust store: {e}")))?;
        fs::rename(&tmp, &self.config.path)
            .map_err(|e| BtpsError::InvalidConfig(format!("replacing trust store: {e}")))?;

        let mut state = self.state.write().expect("trust store lock poisoned");
        state.loaded_mtime = file_mtime(&self.config.path);
        debug!(path = %self.config.path.display(), "trust store flushed");
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.dirty.load(Ordering::SeqCst) {
            if let Err(e) = self.flush() {
                warn!(error = %e, "final trust store flush failed");
            }
        }
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Exclusive advisory lock on the store file, held across the
/// write-temp-then-rename sequence. `lock_exclusive` blocks until any other
/// flusher releases; the lock drops with the handle.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(store_path: &Path) -> Result<Self, BtpsError> {
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(store_path)
            .map_err(|e| BtpsError::InvalidConfig(format!("opening store for locking: {e}")))?;
        file.lock_exclusive()
            .map_err(|e| BtpsError::InvalidConfig(format!("acquiring store lock: {e}")))?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[async_trait]
impl TrustStore for JsonTrustStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<TrustRecord>, BtpsError> {
        self.maybe_reload();
        let state = self.inner.state.read().expect("trust store lock poisoned");
        Ok(state.records.get(id).cloned())
    }

    async fn create(&self, record: TrustRecord) -> Result<TrustRecord, BtpsError> {
        {
            let mut state = self.inner.state.write().expect("trust store lock poisoned");
            if state.records.contains_key(&record.id) {
                return Err(BtpsError::InvalidConfig(format!(
                    "trust record {} already exists",
                    record.id
                )));
            }
            state.records.insert(record.id.clone(), record.clone());
        }
        self.mark_dirty();
        Ok(record)
    }

    async fn update(&self, id: &str, patch: TrustPatch) -> Result<TrustRecord, BtpsError> {
        let updated = {
            let mut state = self.inner.state.write().expect("trust store lock poisoned");
            let record = state
                .records
                .get_mut(id)
                .ok_or_else(|| BtpsError::InvalidConfig(format!("trust record {id} not found")))?;
            patch.apply(record);
            record.clone()
        };
        self.mark_dirty();
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<(), BtpsError> {
        let removed = {
            let mut state = self.inner.state.write().expect("trust store lock poisoned");
            state.records.remove(id).is_some()
        };
        if removed {
            self.mark_dirty();
        }
        Ok(())
    }

    async fn get_all(&self, receiver_id: Option<&str>) -> Result<Vec<TrustRecord>, BtpsError> {
        self.maybe_reload();
        let state = self.inner.state.read().expect("trust store lock poisoned");
        Ok(state
            .records
            .values()
            .filter(|r| receiver_id.map(|rx| r.receiver_id == rx).unwrap_or(true))
            .cloned()
            .collect())
    }
}
