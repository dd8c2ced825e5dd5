//! Backing store contract
//!
//! The physical persistence layer underneath a store: path keyed items,
//! each with [`StoredItemMetadata`] and, for files, an opaque encoded payload.
//! Backing stores know nothing about trust, encryption or access control;
//! they only enforce the shape of the tree.

mod fs;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::linked_data::CodecError;
use crate::metadata::{LocalItemMetadata, StoredItemMetadata};
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

pub use fs::FsBackingStore;
pub use memory::MemoryBackingStore;

/// Capacity of the item-added broadcast channel
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum BackingStoreError {
    #[error("no item at {0}")]
    NotFound(SyncablePath),
    #[error("item at {path} is a {actual}, expected a {expected}")]
    WrongType {
        path: SyncablePath,
        expected: SyncableItemType,
        actual: SyncableItemType,
    },
    #[error("an item already exists at {0}")]
    Conflict(SyncablePath),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("backing store error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Emitted after an item was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackingStoreEvent {
    ItemAdded {
        path: SyncablePath,
        item_type: SyncableItemType,
    },
}

impl BackingStoreEvent {
    pub fn path(&self) -> &SyncablePath {
        match self {
            BackingStoreEvent::ItemAdded { path, .. } => path,
        }
    }
}

/// Pluggable persistence for a store's items
///
/// # Contract
///
/// - Items are addressed by [`SyncablePath`]; the item type is the type of
///   the path's last id (the root is a folder).
/// - Creating an item requires its parent to exist (except for the root) and
///   fails with [`BackingStoreError::Conflict`] if the path is taken.
/// - Items are never overwritten. Only their [`LocalItemMetadata`] is updated.
/// - Every successful create is announced on [`BackingStore::subscribe`].
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn exists_at_path(&self, path: &SyncablePath) -> Result<bool, BackingStoreError>;

    /// Metadata of the item at `path`, optionally asserting its type
    async fn get_at_path(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
    ) -> Result<StoredItemMetadata, BackingStoreError>;

    /// Create a folder or bundle (the type comes from the path)
    async fn create_folder_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
    ) -> Result<(), BackingStoreError>;

    async fn create_binary_file_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Vec<u8>,
    ) -> Result<(), BackingStoreError>;

    /// Encoded payload of a file
    async fn get_data_at_path(&self, path: &SyncablePath) -> Result<Vec<u8>, BackingStoreError>;

    async fn get_metadata_at_path(
        &self,
        path: &SyncablePath,
    ) -> Result<StoredItemMetadata, BackingStoreError> {
        self.get_at_path(path, None).await
    }

    async fn update_local_metadata_at_path(
        &self,
        path: &SyncablePath,
        local: LocalItemMetadata,
    ) -> Result<(), BackingStoreError>;

    /// Ids of the direct children of a container, sorted
    async fn get_ids_in_path(
        &self,
        path: &SyncablePath,
        type_filter: Option<SyncableItemType>,
    ) -> Result<Vec<SyncableId>, BackingStoreError>;

    /// Metadata of the given direct children; missing ids are left out
    async fn get_metadata_by_id_in_path(
        &self,
        path: &SyncablePath,
        ids: &[SyncableId],
    ) -> Result<BTreeMap<SyncableId, StoredItemMetadata>, BackingStoreError> {
        let mut out = BTreeMap::new();
        for id in ids {
            match self.get_at_path(&path.append(id.clone()), None).await {
                Ok(metadata) => {
                    out.insert(id.clone(), metadata);
                }
                Err(BackingStoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn subscribe(&self) -> broadcast::Receiver<BackingStoreEvent>;
}

pub(crate) fn check_type(
    path: &SyncablePath,
    actual: SyncableItemType,
    expected: Option<SyncableItemType>,
) -> Result<(), BackingStoreError> {
    match expected {
        Some(expected) if expected != actual => Err(BackingStoreError::WrongType {
            path: path.clone(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
