use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};

use super::{
    check_type, BackingStore, BackingStoreError, BackingStoreEvent, EVENT_CHANNEL_CAPACITY,
};
use crate::linked_data::CodecError;
use crate::metadata::{LocalItemMetadata, StoredItemMetadata};
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

const METADATA_FILE: &str = "meta.json";
const DATA_FILE: &str = "data.bin";

/// Disk backed store
///
/// Every item is a directory named after its id, nested like the path
/// itself, holding `meta.json` and (for files) `data.bin`:
///
/// ```text
/// <root>/<storage root id>/meta.json
/// <root>/<storage root id>/dpu_.../meta.json
/// <root>/<storage root id>/dpu_.../fpt_.../data.bin
/// ```
#[derive(Debug, Clone)]
pub struct FsBackingStore {
    root: PathBuf,
    /// serializes writers so the exists/create check is atomic
    write_lock: Arc<Mutex<()>>,
    events: broadcast::Sender<BackingStoreEvent>,
}

impl FsBackingStore {
    pub async fn new(root: impl AsRef<Path>) -> Result<Self, BackingStoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
            events,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, path: &SyncablePath) -> PathBuf {
        let mut dir = self.root.join(path.storage_root_id());
        for id in path.ids() {
            dir.push(id.as_str());
        }
        dir
    }

    async fn read_metadata(&self, path: &SyncablePath) -> Result<StoredItemMetadata, BackingStoreError> {
        let file = self.dir_for(path).join(METADATA_FILE);
        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackingStoreError::NotFound(path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes).map_err(CodecError::from)?)
    }

    async fn write_metadata(
        &self,
        path: &SyncablePath,
        metadata: &StoredItemMetadata,
    ) -> Result<(), BackingStoreError> {
        let dir = self.dir_for(path);
        let bytes = serde_json::to_vec_pretty(metadata).map_err(CodecError::from)?;
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, dir.join(METADATA_FILE)).await?;
        Ok(())
    }

    async fn create(
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
            let _guard = self.write_lock.lock().await;
            if self.exists_at_path(path).await? {
                return Err(BackingStoreError::Conflict(path.clone()));
            }
            if let Some(parent) = path.parent() {
                let parent_meta = self.read_metadata(&parent).await?;
                if !parent_meta.item_type.is_container() {
                    return Err(BackingStoreError::WrongType {
                        path: parent,
                        expected: SyncableItemType::Bundle,
                        actual: parent_meta.item_type,
                    });
                }
            }

            let dir = self.dir_for(path);
            tokio::fs::create_dir_all(&dir).await?;
            if let Some(data) = data {
                tokio::fs::write(dir.join(DATA_FILE), data).await?;
            }
            // metadata last: an item exists once its meta.json does
            self.write_metadata(path, &metadata).await?;
        }

        let _ = self.events.send(BackingStoreEvent::ItemAdded {
            path: path.clone(),
            item_type,
        });
        Ok(())
    }
}

#[async_trait]
impl BackingStore for FsBackingStore {
    async fn exists_at_path(&self, path: &SyncablePath) -> Result<bool, BackingStoreError> {
        Ok(tokio::fs::try_exists(self.dir_for(path).join(METADATA_FILE)).await?)
    }

    async fn get_at_path(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
    ) -> Result<StoredItemMetadata, BackingStoreError> {
        let metadata = self.read_metadata(path).await?;
        check_type(path, metadata.item_type, expected_type)?;
        Ok(metadata)
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
        self.create(path, metadata, None).await
    }

    async fn create_binary_file_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Vec<u8>,
    ) -> Result<(), BackingStoreError> {
        check_type(path, path.item_type(), Some(SyncableItemType::File))?;
        self.create(path, metadata, Some(data)).await
    }

    async fn get_data_at_path(&self, path: &SyncablePath) -> Result<Vec<u8>, BackingStoreError> {
        self.get_at_path(path, Some(SyncableItemType::File)).await?;
        Ok(tokio::fs::read(self.dir_for(path).join(DATA_FILE)).await?)
    }

    async fn update_local_metadata_at_path(
        &self,
        path: &SyncablePath,
        local: LocalItemMetadata,
    ) -> Result<(), BackingStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut metadata = self.read_metadata(path).await?;
        metadata.local = local;
        self.write_metadata(path, &metadata).await
    }

    async fn get_ids_in_path(
        &self,
        path: &SyncablePath,
        type_filter: Option<SyncableItemType>,
    ) -> Result<Vec<SyncableId>, BackingStoreError> {
        let metadata = self.read_metadata(path).await?;
        if !metadata.item_type.is_container() {
            return Err(BackingStoreError::WrongType {
                path: path.clone(),
                expected: SyncableItemType::Folder,
                actual: metadata.item_type,
            });
        }

        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(self.dir_for(path)).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<SyncableId>().ok())
            else {
                continue;
            };
            if type_filter.map_or(true, |t| id.item_type() == t)
                && tokio::fs::try_exists(entry.path().join(METADATA_FILE)).await?
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn subscribe(&self) -> broadcast::Receiver<BackingStoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{NoExtras, PrivateCryptoKeySet, Signed};
    use crate::linked_data::Hash;
    use crate::metadata::{SyncableItemMetadata, SyncableOrigin, SyncableProvenance};

    fn metadata(item_type: SyncableItemType) -> StoredItemMetadata {
        let key = PrivateCryptoKeySet::generate();
        let origin = Signed::sign(
            SyncableOrigin {
                content_hash: Hash::of(b"x"),
                trusted_time: None,
            },
            &NoExtras,
            &key,
        )
        .unwrap();
        StoredItemMetadata {
            item_type,
            item: SyncableItemMetadata {
                name: "item".to_string(),
                provenance: SyncableProvenance {
                    origin,
                    acceptance: None,
                },
            },
            local: LocalItemMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_fs_create_and_list() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = FsBackingStore::new(temp.path()).await.unwrap();
        let mut events = store.subscribe();

        let root = SyncablePath::root("store");
        store
            .create_folder_with_path(&root, metadata(SyncableItemType::Folder))
            .await
            .unwrap();

        let file = root.append(SyncableId::new_time(SyncableItemType::File, false));
        store
            .create_binary_file_with_path(&file, metadata(SyncableItemType::File), b"abc".to_vec())
            .await
            .unwrap();

        assert_eq!(store.get_data_at_path(&file).await.unwrap(), b"abc");
        assert_eq!(
            store.get_ids_in_path(&root, None).await.unwrap(),
            vec![file.last_id().unwrap().clone()]
        );
        assert!(matches!(
            store
                .create_binary_file_with_path(&file, metadata(SyncableItemType::File), vec![])
                .await,
            Err(BackingStoreError::Conflict(_))
        ));

        assert_eq!(events.recv().await.unwrap().path(), &root);
        assert_eq!(events.recv().await.unwrap().path(), &file);
    }

    #[tokio::test]
    async fn test_fs_requires_parent() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = FsBackingStore::new(temp.path()).await.unwrap();
        let orphan = SyncablePath::root("store")
            .append(SyncableId::new_uuid(SyncableItemType::Folder, false));
        assert!(matches!(
            store
                .create_folder_with_path(&orphan, metadata(SyncableItemType::Folder))
                .await,
            Err(BackingStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_update_local_metadata() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = FsBackingStore::new(temp.path()).await.unwrap();
        let root = SyncablePath::root("store");
        store
            .create_folder_with_path(&root, metadata(SyncableItemType::Folder))
            .await
            .unwrap();

        let local = LocalItemMetadata {
            hash: Some(Hash::of(b"tree")),
            num_descendants: 3,
            size_bytes: 10,
        };
        store
            .update_local_metadata_at_path(&root, local.clone())
            .await
            .unwrap();
        assert_eq!(store.get_metadata_at_path(&root).await.unwrap().local, local);
    }
}
