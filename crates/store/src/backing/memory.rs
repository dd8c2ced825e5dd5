use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::{
    check_type, BackingStore, BackingStoreError, BackingStoreEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::metadata::{LocalItemMetadata, StoredItemMetadata};
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

/// In-memory backing store using HashMaps
///
/// Clones share the same items, which is how tests put several users
/// (each with their own store handle) on top of one replica.
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    inner: Arc<RwLock<MemoryBackingStoreInner>>,
    events: broadcast::Sender<BackingStoreEvent>,
}

#[derive(Debug, Default)]
struct MemoryBackingStoreInner {
    items: HashMap<SyncablePath, MemoryEntry>,
    /// container path -> ids of its direct children
    children: HashMap<SyncablePath, BTreeSet<SyncableId>>,
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    metadata: StoredItemMetadata,
    data: Option<Vec<u8>>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(MemoryBackingStoreInner::default())),
            events,
        }
    }

    /// Number of items held, root included
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    fn insert(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Option<Vec<u8>>,
    ) -> Result<(), BackingStoreError> {
        let item_type = path.item_type();
        if metadata.item_type != item_type {
            return Err(BackingStoreError::WrongType {
                path: path.clone(),
                expected: item_type,
                actual: metadata.item_type,
            });
        }

        {
            let mut inner = self.inner.write();
            if inner.items.contains_key(path) {
                return Err(BackingStoreError::Conflict(path.clone()));
            }
            if let Some(parent) = path.parent() {
                let parent_type = inner
                    .items
                    .get(&parent)
                    .map(|entry| entry.metadata.item_type)
                    .ok_or_else(|| BackingStoreError::NotFound(parent.clone()))?;
                if !parent_type.is_container() {
                    return Err(BackingStoreError::WrongType {
                        path: parent,
                        expected: SyncableItemType::Bundle,
                        actual: parent_type,
                    });
                }
                if let Some(id) = path.last_id() {
                    inner.children.entry(parent).or_default().insert(id.clone());
                }
            }
            if item_type.is_container() {
                inner.children.entry(path.clone()).or_default();
            }
            inner
                .items
                .insert(path.clone(), MemoryEntry { metadata, data });
        }

        // no receivers is fine
        let _ = self.events.send(BackingStoreEvent::ItemAdded {
            path: path.clone(),
            item_type,
        });
        Ok(())
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn exists_at_path(&self, path: &SyncablePath) -> Result<bool, BackingStoreError> {
        Ok(self.inner.read().items.contains_key(path))
    }

    async fn get_at_path(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
    ) -> Result<StoredItemMetadata, BackingStoreError> {
        let inner = self.inner.read();
        let entry = inner
            .items
            .get(path)
            .ok_or_else(|| BackingStoreError::NotFound(path.clone()))?;
        check_type(path, entry.metadata.item_type, expected_type)?;
        Ok(entry.metadata.clone())
    }

    async fn create_folder_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
    ) -> Result<(), BackingStoreError> {
        if !path.item_type().is_container() {
            return Err(BackingStoreError::WrongType {
                path: path.clone(),
                expected: SyncableItemType::Folder,
                actual: path.item_type(),
            });
        }
        self.insert(path, metadata, None)
    }

    async fn create_binary_file_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Vec<u8>,
    ) -> Result<(), BackingStoreError> {
        check_type(path, path.item_type(), Some(SyncableItemType::File))?;
        self.insert(path, metadata, Some(data))
    }

    async fn get_data_at_path(&self, path: &SyncablePath) -> Result<Vec<u8>, BackingStoreError> {
        let inner = self.inner.read();
        let entry = inner
            .items
            .get(path)
            .ok_or_else(|| BackingStoreError::NotFound(path.clone()))?;
        check_type(path, entry.metadata.item_type, Some(SyncableItemType::File))?;
        Ok(entry.data.clone().unwrap_or_default())
    }

    async fn update_local_metadata_at_path(
        &self,
        path: &SyncablePath,
        local: LocalItemMetadata,
    ) -> Result<(), BackingStoreError> {
        let mut inner = self.inner.write();
        let entry = inner
            .items
            .get_mut(path)
            .ok_or_else(|| BackingStoreError::NotFound(path.clone()))?;
        entry.metadata.local = local;
        Ok(())
    }

    async fn get_ids_in_path(
        &self,
        path: &SyncablePath,
        type_filter: Option<SyncableItemType>,
    ) -> Result<Vec<SyncableId>, BackingStoreError> {
        let inner = self.inner.read();
        let children = inner
            .children
            .get(path)
            .ok_or_else(|| BackingStoreError::NotFound(path.clone()))?;
        Ok(children
            .iter()
            .filter(|id| type_filter.map_or(true, |t| id.item_type() == t))
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackingStoreEvent> {
        self.events.subscribe()
    }
}
