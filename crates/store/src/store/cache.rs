//! Caches shared by stores
//!
//! Uses moka with access-resetting (time to idle) eviction. Entries are keyed
//! by the owning store's uid plus the item path, so one [`StoreCaches`] can
//! serve several stores. Watched documents are pinned in a separate retained
//! map until their last watcher releases them.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use parking_lot::Mutex;
use uuid::Uuid;

use super::item::SyncableItem;
use crate::config::StoreConfig;
use crate::path::SyncablePath;

pub(crate) type CacheKey = (Uuid, SyncablePath);

/// A cached document, type erased so documents of every kind share one cache
pub(crate) type AnyDocument = Arc<dyn Any + Send + Sync>;

pub struct StoreCaches {
    accessors: Cache<CacheKey, SyncableItem>,
    documents: Cache<CacheKey, AnyDocument>,
    decoded: Cache<CacheKey, Arc<Vec<u8>>>,
    /// key -> (retain count, document)
    retained: Mutex<HashMap<CacheKey, (usize, AnyDocument)>>,
    /// Advisory locks, one per store uid
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl StoreCaches {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            accessors: Cache::builder()
                .time_to_idle(Duration::from_millis(config.accessor_cache_idle_ms))
                .build(),
            documents: Cache::builder()
                .time_to_idle(Duration::from_millis(config.document_cache_idle_ms))
                .build(),
            decoded: Cache::builder()
                .max_capacity(config.decoded_cache_capacity)
                .time_to_idle(Duration::from_millis(config.decoded_cache_idle_ms))
                .build(),
            retained: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn accessor(
        &self,
        key: CacheKey,
        init: impl FnOnce() -> SyncableItem,
    ) -> SyncableItem {
        self.accessors.get_with(key, init)
    }

    /// A cached document, retained ones first
    pub(crate) fn document(&self, key: &CacheKey) -> Option<AnyDocument> {
        if let Some((_, document)) = self.retained.lock().get(key) {
            return Some(document.clone());
        }
        self.documents.get(key)
    }

    pub(crate) fn insert_document(&self, key: CacheKey, document: AnyDocument) {
        self.documents.insert(key, document);
    }

    /// Pin a document until a matching [`StoreCaches::release`]
    pub(crate) fn retain(&self, key: CacheKey, document: AnyDocument) {
        let mut retained = self.retained.lock();
        let entry = retained.entry(key).or_insert((0, document));
        entry.0 += 1;
    }

    pub(crate) fn release(&self, key: &CacheKey) {
        let mut retained = self.retained.lock();
        let Some(entry) = retained.get_mut(key) else {
            return;
        };
        entry.0 = entry.0.saturating_sub(1);
        if entry.0 == 0 {
            if let Some((_, document)) = retained.remove(key) {
                // falls back to idle eviction
                self.documents.insert(key.clone(), document);
            }
            tracing::debug!("released watched document {}", key.1);
        }
    }

    #[cfg(test)]
    pub(crate) fn retain_count(&self, key: &CacheKey) -> usize {
        self.retained
            .lock()
            .get(key)
            .map(|(count, _)| *count)
            .unwrap_or_default()
    }

    pub(crate) fn decoded(&self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        self.decoded.get(key)
    }

    pub(crate) fn insert_decoded(&self, key: CacheKey, data: Arc<Vec<u8>>) {
        self.decoded.insert(key, data);
    }

    pub(crate) fn lock_for(&self, uid: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(uid).or_default().clone()
    }

    /// Drop everything cached for a store
    pub(crate) fn invalidate_store(&self, uid: Uuid) {
        for (key, _) in self.accessors.iter() {
            if key.0 == uid {
                self.accessors.invalidate(&*key);
            }
        }
        for (key, _) in self.documents.iter() {
            if key.0 == uid {
                self.documents.invalidate(&*key);
            }
        }
        for (key, _) in self.decoded.iter() {
            if key.0 == uid {
                self.decoded.invalidate(&*key);
            }
        }
        self.retained.lock().retain(|key, _| key.0 != uid);
        self.locks.lock().remove(&uid);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            accessors: self.accessors.entry_count(),
            documents: self.documents.entry_count(),
            decoded: self.decoded.entry_count(),
            retained: self.retained.lock().len(),
        }
    }
}

impl Default for StoreCaches {
    fn default() -> Self {
        Self::new(&StoreConfig::default())
    }
}

impl std::fmt::Debug for StoreCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreCaches")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache statistics for debugging
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub accessors: u64,
    pub documents: u64,
    pub decoded: u64,
    pub retained: usize,
}
