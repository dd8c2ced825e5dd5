//! Item accessors
//!
//! Items are a tagged union ([`SyncableItem`]) of three accessor types.
//! Shared behavior comes from capability traits rather than a type
//! hierarchy: everything is [`Hashable`], folders and bundles are
//! [`ChildEnumerable`], files are [`Encodable`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{CreateMode, ItemHandle, StoreError, StoreHandle, SyncableStore};
use crate::access::{AccessControlKind, Role};
use crate::crdt::SyncableDocument;
use crate::crypto::{CryptoKeySetId, PublicKey};
use crate::folder_ops::FolderOperationsHandler;
use crate::linked_data::Hash;
use crate::metadata::{LocalItemMetadata, StoredItemMetadata};
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

/// One line of a recursive listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsEntry {
    pub path: SyncablePath,
    pub item_type: SyncableItemType,
    /// Decrypted name, or the id in angle brackets if it cannot be read
    pub name: String,
    /// Names from the listed container down to this item, joined by `/`
    pub relative_name: String,
    pub depth: usize,
    pub size_bytes: u64,
}

impl LsEntry {
    pub fn default_format(&self) -> String {
        let suffix = if self.item_type.is_container() { "/" } else { "" };
        format!("{}{}{}", "  ".repeat(self.depth), self.name, suffix)
    }
}

pub trait ItemAccessor: Send + Sync {
    fn handle(&self) -> &ItemHandle;

    fn path(&self) -> &SyncablePath {
        self.handle().path()
    }

    fn store(&self) -> Result<SyncableStore, StoreError> {
        self.handle().store()
    }
}

#[async_trait]
pub trait Hashable: ItemAccessor {
    async fn get_local_metadata(&self) -> Result<LocalItemMetadata, StoreError> {
        self.store()?.get_local_metadata(self.path()).await
    }

    async fn get_hash(&self) -> Result<Hash, StoreError> {
        self.store()?.get_hash(self.path()).await
    }

    async fn mark_needs_recompute_local_metadata(&self) -> Result<(), StoreError> {
        self.store()?
            .mark_needs_recompute_local_metadata(self.path())
            .await
    }

    async fn get_metadata(&self) -> Result<StoredItemMetadata, StoreError> {
        Ok(self.store()?.backing().get_at_path(self.path(), None).await?)
    }

    /// Plain name of the item, decrypting it if needed
    async fn name(&self) -> Result<String, StoreError> {
        let store = self.store()?;
        let stored = store.backing().get_at_path(self.path(), None).await?;
        store.item_name(self.path(), &stored).await
    }
}

#[async_trait]
pub trait Encodable: ItemAccessor {
    /// The payload as stored, encrypted for encrypted ids
    async fn get_encoded_data(&self) -> Result<Vec<u8>, StoreError> {
        Ok(self.store()?.backing().get_data_at_path(self.path()).await?)
    }
}

#[async_trait]
pub trait ChildEnumerable: Hashable {
    /// Whether a child exists and was not deleted
    async fn exists(&self, id: &SyncableId) -> Result<bool, StoreError> {
        let store = self.store()?;
        let path = self.path().append(id.clone());
        Ok(store.backing().exists_at_path(&path).await? && !store.is_deleted_path(&path).await?)
    }

    /// A checked accessor for a child
    ///
    /// Fails with `NotFound`, `WrongType`, `Deleted` or `Untrusted`, checked
    /// in that order.
    async fn get(
        &self,
        id: &SyncableId,
        expected_type: Option<SyncableItemType>,
    ) -> Result<SyncableItem, StoreError> {
        let store = self.store()?;
        let path = self.path().append(id.clone());
        store.check_child(&path, expected_type, true).await?;
        Ok(store.accessor(&path))
    }

    /// Like [`ChildEnumerable::get`], also requiring write access
    async fn get_mutable(
        &self,
        id: &SyncableId,
        expected_type: Option<SyncableItemType>,
    ) -> Result<SyncableItem, StoreError> {
        let item = self.get(id, expected_type).await?;
        self.store()?
            .require_role(item.path(), Role::has_write_access, "write")
            .await?;
        Ok(item)
    }

    /// Ids of the children that were not deleted
    async fn get_ids(
        &self,
        type_filter: Option<SyncableItemType>,
    ) -> Result<Vec<SyncableId>, StoreError> {
        let store = self.store()?;
        let ids = store
            .backing()
            .get_ids_in_path(self.path(), type_filter)
            .await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if !store.is_deleted_path(&self.path().append(id.clone())).await? {
                out.push(id);
            }
        }
        Ok(out)
    }

    async fn get_metadata_by_id(
        &self,
        ids: &[SyncableId],
    ) -> Result<BTreeMap<SyncableId, StoredItemMetadata>, StoreError> {
        Ok(self
            .store()?
            .backing()
            .get_metadata_by_id_in_path(self.path(), ids)
            .await?)
    }

    /// Recursive listing of trusted, non-deleted descendants
    async fn ls(&self) -> Result<Vec<LsEntry>, StoreError> {
        let store = self.store()?;
        let mut entries = Vec::new();
        store
            .list_into(self.path(), String::new(), 0, &mut entries)
            .await?;
        Ok(entries)
    }

    async fn ls_formatted(
        &self,
        formatter: &(dyn for<'e> Fn(&'e LsEntry) -> String + Sync),
    ) -> Result<String, StoreError> {
        let entries = self.ls().await?;
        Ok(entries
            .iter()
            .map(formatter)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    /// Descendants whose relative name matches a glob pattern
    async fn find(&self, pattern: &str) -> Result<Vec<LsEntry>, StoreError> {
        let pattern = glob::Pattern::new(pattern)
            .map_err(|e| StoreError::Format(format!("invalid pattern: {e}")))?;
        Ok(self
            .ls()
            .await?
            .into_iter()
            .filter(|entry| pattern.matches(&entry.relative_name))
            .collect())
    }

    async fn create_bundle(
        &self,
        id: SyncableId,
        mode: CreateMode,
    ) -> Result<SyncableBundle, StoreError> {
        check_new_id(&id, SyncableItemType::Bundle)?;
        let store = self.store()?;
        let path = store.create_item(self.path(), id, mode, None).await?;
        store.accessor(&path).into_bundle()
    }

    async fn create_binary_file(
        &self,
        id: SyncableId,
        mode: CreateMode,
        data: Vec<u8>,
    ) -> Result<SyncableFile, StoreError> {
        check_new_id(&id, SyncableItemType::File)?;
        let store = self.store()?;
        let path = store.create_item(self.path(), id, mode, Some(data)).await?;
        store.accessor(&path).into_file()
    }

    async fn create_string_file(
        &self,
        id: SyncableId,
        mode: CreateMode,
        content: &str,
    ) -> Result<SyncableFile, StoreError> {
        self.create_binary_file(id, mode, content.as_bytes().to_vec())
            .await
    }

    async fn create_json_file<T: Serialize + Sync + ?Sized>(
        &self,
        id: SyncableId,
        mode: CreateMode,
        value: &T,
    ) -> Result<SyncableFile, StoreError> {
        let data = serde_json::to_vec(value).map_err(|e| StoreError::Format(e.to_string()))?;
        self.create_binary_file(id, mode, data).await
    }

    /// Tombstone a child
    async fn delete(&self, id: &SyncableId) -> Result<(), StoreError> {
        self.store()?
            .delete_item(&self.path().append(id.clone()))
            .await
    }
}

fn check_new_id(id: &SyncableId, expected: SyncableItemType) -> Result<(), StoreError> {
    if id.is_reserved() {
        return Err(StoreError::Format(format!("{id} is reserved")));
    }
    if id.item_type() != expected {
        return Err(StoreError::Format(format!("{id} is not a {expected} id")));
    }
    Ok(())
}

macro_rules! accessor {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            handle: ItemHandle,
        }

        impl ItemAccessor for $name {
            fn handle(&self) -> &ItemHandle {
                &self.handle
            }
        }

        impl Hashable for $name {}
    };
}

accessor!(SyncableFolder);
accessor!(SyncableBundle);
accessor!(SyncableFile);

impl ChildEnumerable for SyncableFolder {}
impl ChildEnumerable for SyncableBundle {}
impl Encodable for SyncableFile {}

impl SyncableFolder {
    /// Create a child folder along with its documents
    ///
    /// Serialized with other folder creations of this store.
    pub async fn create_folder(
        &self,
        id: SyncableId,
        mode: CreateMode,
    ) -> Result<SyncableFolder, StoreError> {
        check_new_id(&id, SyncableItemType::Folder)?;
        let store = self.store()?;
        let _guard = store.lock_creation().await?;
        let path = store.create_item(self.path(), id, mode, None).await?;
        store.accessor(&path).into_folder()
    }

    pub async fn access_control(
        &self,
    ) -> Result<SyncableDocument<AccessControlKind>, StoreError> {
        self.store()?.access_control_document(self.path()).await
    }

    pub async fn user_role(&self) -> Result<Option<Role>, StoreError> {
        self.store()?.user_role(self.path()).await
    }

    pub fn folder_operations(&self) -> Result<FolderOperationsHandler, StoreError> {
        Ok(self.store()?.folder_operations(self.path()))
    }

    /// A content-derived id, salted with the folder's keys when encrypted
    pub async fn deterministic_id(
        &self,
        item_type: SyncableItemType,
        encrypted: bool,
        content: &[u8],
    ) -> Result<SyncableId, StoreError> {
        if !encrypted {
            return Ok(SyncableId::deterministic(item_type, false, content, None));
        }
        let salt = self.folder_operations()?.deterministic_id_salt().await?;
        Ok(SyncableId::deterministic(item_type, true, content, Some(&salt)))
    }

    pub async fn grant_access(&self, public_key: PublicKey, role: Role) -> Result<(), StoreError> {
        let store = self.store()?;
        let access = store.access_control_document(self.path()).await?;
        let keys = store.user_keys().clone();
        access
            .update(|access| access.add_access(keys.as_ref(), public_key, role))
            .await?;
        access.save().await?;
        tracing::info!("granted {} in {} to {}", role, self.path(), public_key);
        Ok(())
    }

    pub async fn modify_access(
        &self,
        target: &CryptoKeySetId,
        role: Role,
    ) -> Result<(), StoreError> {
        let store = self.store()?;
        let access = store.access_control_document(self.path()).await?;
        let keys = store.user_keys().clone();
        access
            .update(|access| access.modify_access(keys.as_ref(), target, role))
            .await?;
        access.save().await?;
        tracing::info!("changed role of {} in {} to {}", target, self.path(), role);
        Ok(())
    }

    pub async fn remove_access(&self, target: &CryptoKeySetId) -> Result<(), StoreError> {
        let store = self.store()?;
        let access = store.access_control_document(self.path()).await?;
        let keys = store.user_keys().clone();
        access
            .update(|access| access.remove_access(keys.as_ref(), target))
            .await?;
        access.save().await?;
        tracing::info!("removed {} from {}", target, self.path());
        Ok(())
    }
}

impl SyncableFile {
    /// Decoded payload; needs read access in the owning folder
    pub async fn get_binary(&self) -> Result<Vec<u8>, StoreError> {
        self.store()?.read_file(self.path()).await
    }

    pub async fn get_string(&self) -> Result<String, StoreError> {
        String::from_utf8(self.get_binary().await?)
            .map_err(|e| StoreError::Format(format!("{} is not utf-8: {e}", self.path())))
    }

    pub async fn get_json<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_slice(&self.get_binary().await?)
            .map_err(|e| StoreError::Format(format!("{} is not valid json: {e}", self.path())))
    }
}

#[derive(Debug, Clone)]
pub enum SyncableItem {
    Folder(SyncableFolder),
    Bundle(SyncableBundle),
    File(SyncableFile),
}

impl SyncableItem {
    pub(crate) fn new(store: StoreHandle, path: SyncablePath) -> Self {
        let item_type = path.item_type();
        let handle = ItemHandle::new(store, path);
        match item_type {
            SyncableItemType::Folder => SyncableItem::Folder(SyncableFolder { handle }),
            SyncableItemType::Bundle => SyncableItem::Bundle(SyncableBundle { handle }),
            SyncableItemType::File => SyncableItem::File(SyncableFile { handle }),
        }
    }

    pub fn item_type(&self) -> SyncableItemType {
        match self {
            SyncableItem::Folder(_) => SyncableItemType::Folder,
            SyncableItem::Bundle(_) => SyncableItemType::Bundle,
            SyncableItem::File(_) => SyncableItemType::File,
        }
    }

    fn wrong_type(&self, expected: SyncableItemType) -> StoreError {
        StoreError::WrongType {
            path: self.path().clone(),
            expected,
            actual: self.item_type(),
        }
    }

    pub fn into_folder(self) -> Result<SyncableFolder, StoreError> {
        match self {
            SyncableItem::Folder(folder) => Ok(folder),
            other => Err(other.wrong_type(SyncableItemType::Folder)),
        }
    }

    pub fn into_bundle(self) -> Result<SyncableBundle, StoreError> {
        match self {
            SyncableItem::Bundle(bundle) => Ok(bundle),
            other => Err(other.wrong_type(SyncableItemType::Bundle)),
        }
    }

    pub fn into_file(self) -> Result<SyncableFile, StoreError> {
        match self {
            SyncableItem::File(file) => Ok(file),
            other => Err(other.wrong_type(SyncableItemType::File)),
        }
    }
}

impl ItemAccessor for SyncableItem {
    fn handle(&self) -> &ItemHandle {
        match self {
            SyncableItem::Folder(folder) => folder.handle(),
            SyncableItem::Bundle(bundle) => bundle.handle(),
            SyncableItem::File(file) => file.handle(),
        }
    }
}

impl Hashable for SyncableItem {}
