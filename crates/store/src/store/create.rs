//! Item creation
//!
//! Local creation signs a fresh origin for the item. Creation via sync
//! stores the metadata a replica sent verbatim; its provenance is checked
//! the next time the item is read.

use futures::future::{BoxFuture, FutureExt};

use super::{is_structural, StoreError, SyncableStore, ROOT_NAME};
use crate::access::{AccessControlDocument, AccessControlKind, Role};
use crate::changes::{StoreChangesDocument, StoreChangesKind};
use crate::crdt::SyncableDocument;
use crate::crypto::{PublicCryptoKeySet, Signed};
use crate::linked_data::Hash;
use crate::metadata::{
    container_content_hash, AcceptanceExtras, LocalItemMetadata, OriginExtras,
    StoredItemMetadata, SyncableAcceptance, SyncableItemMetadata, SyncableOrigin,
    SyncableProvenance,
};
use crate::path::{SyncableId, SyncableItemType, SyncablePath};
use crate::trusted_time::TrustedTime;

/// How an item comes into existence
#[derive(Debug, Clone)]
pub enum CreateMode {
    /// Written by this user: the name is plain text and gets encrypted for
    /// encrypted ids, and a new origin is signed
    Local { name: String },
    /// Replayed from a replica with its metadata as it was sent; payloads
    /// are already encoded
    ViaSync { metadata: SyncableItemMetadata },
}

impl CreateMode {
    pub fn local(name: impl Into<String>) -> Self {
        CreateMode::Local { name: name.into() }
    }
}

impl SyncableStore {
    /// Create `parent/id`, returning its path
    ///
    /// `data` is the payload for files and must be `None` for containers.
    pub(crate) fn create_item<'a>(
        &'a self,
        parent: &'a SyncablePath,
        id: SyncableId,
        mode: CreateMode,
        data: Option<Vec<u8>>,
    ) -> BoxFuture<'a, Result<SyncablePath, StoreError>> {
        async move {
            let path = parent.append(id);
            let item_type = path.item_type();
            if item_type == SyncableItemType::Folder
                && parent.item_type() == SyncableItemType::Bundle
            {
                return Err(StoreError::WrongType {
                    path: parent.clone(),
                    expected: SyncableItemType::Folder,
                    actual: SyncableItemType::Bundle,
                });
            }
            if item_type.is_container() == data.is_some() {
                return Err(StoreError::Format(format!(
                    "{item_type} at {path} {} a payload",
                    if data.is_some() { "cannot have" } else { "needs" }
                )));
            }

            match mode {
                CreateMode::Local { name } => self.create_local(path, name, data).await,
                CreateMode::ViaSync { metadata } => self.create_via_sync(path, metadata, data).await,
            }
        }
        .boxed()
    }

    async fn create_local(
        &self,
        path: SyncablePath,
        name: String,
        data: Option<Vec<u8>>,
    ) -> Result<SyncablePath, StoreError> {
        let (metadata, data) = self.prepare_local(&path, name, data).await?;
        self.commit_local(&path, metadata, data).await?;
        Ok(path)
    }

    /// Check, encrypt and sign a new local item without writing it
    pub(crate) async fn prepare_local(
        &self,
        path: &SyncablePath,
        name: String,
        data: Option<Vec<u8>>,
    ) -> Result<(StoredItemMetadata, Option<Vec<u8>>), StoreError> {
        if self.backing().exists_at_path(path).await? {
            return Err(StoreError::Conflict(path.clone()));
        }
        let role = if is_structural(path) {
            None
        } else {
            if self.is_deleted_path(path).await? {
                return Err(StoreError::Deleted(path.clone()));
            }
            Some(
                self.require_role(path, Role::has_write_access, "write")
                    .await?,
            )
        };

        let item_type = path.item_type();
        let (name, data) = if path.last_id().is_some_and(|id| id.is_encrypted()) {
            let operations = self.folder_operations(&path.owning_folder());
            let name = operations.encrypt_name(&name).await?;
            let data = match data {
                Some(data) => Some(operations.encrypt_payload(&data).await?),
                None => None,
            };
            (name, data)
        } else {
            (name, data)
        };

        let content_hash = match &data {
            Some(data) => Hash::of(data),
            None => container_content_hash(path, item_type, &name)?,
        };
        let parent = path.parent().unwrap_or_else(|| path.clone());
        let trusted_time = self.generate_trusted_time(&parent, &content_hash).await;
        let accept = role.is_some_and(|role| role.is_owner_or_above());
        let provenance = self.sign_provenance(path, &name, content_hash, trusted_time, accept)?;

        let metadata = StoredItemMetadata {
            item_type,
            item: SyncableItemMetadata { name, provenance },
            local: local_metadata_for(data.as_deref()),
        };
        Ok((metadata, data))
    }

    /// Write an item signed by [`Self::prepare_local`]
    pub(crate) async fn commit_local(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        let item_type = metadata.item_type;
        self.write_item(path, metadata, data).await?;
        self.trust_marks().mark(path);

        if item_type == SyncableItemType::Folder {
            self.bootstrap_folder_documents(path).await?;
        }
        tracing::debug!("created {} {}", item_type, path);
        Ok(())
    }

    async fn create_via_sync(
        &self,
        path: SyncablePath,
        metadata: SyncableItemMetadata,
        data: Option<Vec<u8>>,
    ) -> Result<SyncablePath, StoreError> {
        if self.is_deleted_path(&path).await? {
            return Err(StoreError::Deleted(path));
        }
        let metadata = StoredItemMetadata {
            item_type: path.item_type(),
            item: metadata,
            local: local_metadata_for(data.as_deref()),
        };
        self.write_item(&path, metadata, data).await?;
        tracing::debug!("replicated {}", path);
        Ok(path)
    }

    async fn write_item(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Option<Vec<u8>>,
    ) -> Result<(), StoreError> {
        match data {
            Some(data) => {
                self.backing()
                    .create_binary_file_with_path(path, metadata, data)
                    .await?
            }
            None => self.backing().create_folder_with_path(path, metadata).await?,
        }
        if let Some(parent) = path.parent() {
            self.mark_needs_recompute_local_metadata(&parent).await?;
        }
        Ok(())
    }

    /// Write the root folder and its documents
    pub(crate) async fn create_root(&self) -> Result<(), StoreError> {
        let _guard = self.lock_creation().await?;
        let root = self.root_path();
        if self.backing().exists_at_path(&root).await? {
            return Err(StoreError::Conflict(root));
        }

        let content_hash = container_content_hash(&root, SyncableItemType::Folder, ROOT_NAME)?;
        let trusted_time = self.generate_trusted_time(&root, &content_hash).await;
        let provenance = self.sign_provenance(&root, ROOT_NAME, content_hash, trusted_time, true)?;
        let metadata = StoredItemMetadata {
            item_type: SyncableItemType::Folder,
            item: SyncableItemMetadata {
                name: ROOT_NAME.to_string(),
                provenance,
            },
            local: LocalItemMetadata::default(),
        };
        self.backing().create_folder_with_path(&root, metadata).await?;
        *self.inner.creator.write() = Some(self.user_keys().signing_key_set().public_key());
        self.trust_marks().mark(&root);
        self.bootstrap_folder_documents(&root).await
    }

    /// Write a replica's root folder as it was sent
    pub(crate) async fn create_root_via_sync(
        &self,
        metadata: SyncableItemMetadata,
    ) -> Result<(), StoreError> {
        let _guard = self.lock_creation().await?;
        self.create_via_sync(self.root_path(), metadata, None)
            .await?;
        Ok(())
    }

    /// Create a folder's access control and store changes documents
    ///
    /// The writer becomes the folder's creator. The store creator, if someone
    /// else, is added as an owner so it keeps authority over the whole tree.
    async fn bootstrap_folder_documents(&self, folder: &SyncablePath) -> Result<(), StoreError> {
        let creator = self.user_keys().signing_key_set().public();
        let store_creator = self.creator().await?;
        let mut others = Vec::new();
        if store_creator != creator.public_key {
            others.push((PublicCryptoKeySet::from(store_creator), Role::Owner));
        }

        let access = AccessControlDocument::new(folder.clone(), &creator, &others)?;
        SyncableDocument::<AccessControlKind>::create_bundle(
            self,
            folder,
            SyncableId::access_control(),
            "access-control",
            &access,
        )
        .await?;
        SyncableDocument::<StoreChangesKind>::create_bundle(
            self,
            folder,
            SyncableId::store_changes(),
            "store-changes",
            &StoreChangesDocument::new(folder.clone()),
        )
        .await?;
        Ok(())
    }

    /// Serialize folder creation for this store
    ///
    /// Fails with [`StoreError::LockTimeout`] once the configured lock
    /// timeout passes.
    pub async fn lock_creation(
        &self,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, StoreError> {
        let lock = self.caches().lock_for(self.uid());
        tokio::time::timeout(self.config().lock_timeout(), lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)
    }

    /// Trusted time for a write, `None` if the source cannot or will not issue
    async fn generate_trusted_time(
        &self,
        parent: &SyncablePath,
        content_hash: &Hash,
    ) -> Option<TrustedTime> {
        match self
            .trusted_time()
            .generate_trusted_time(parent, content_hash)
            .await
        {
            Ok(trusted_time) => trusted_time,
            Err(e) => {
                tracing::warn!("writing {} without trusted time: {}", parent, e);
                None
            }
        }
    }

    /// Sign an origin and, when possible, an acceptance for a new item
    ///
    /// Acceptance needs trusted time, so without it the item relies on its
    /// origin alone.
    fn sign_provenance(
        &self,
        path: &SyncablePath,
        name: &str,
        content_hash: Hash,
        trusted_time: Option<TrustedTime>,
        accept: bool,
    ) -> Result<SyncableProvenance, StoreError> {
        let signing = self.user_keys().signing_key_set();
        let acceptance = match (&trusted_time, accept) {
            (Some(trusted_time), true) => Some(Signed::sign(
                SyncableAcceptance {
                    time_id: trusted_time.time_id.clone(),
                    trusted_time_signature: trusted_time.signature.clone(),
                },
                &AcceptanceExtras {
                    path,
                    content_hash: &content_hash,
                },
                &signing,
            )?),
            _ => None,
        };
        let origin = Signed::sign(
            SyncableOrigin {
                content_hash,
                trusted_time,
            },
            &OriginExtras {
                path,
                item_type: path.item_type(),
                name,
            },
            &signing,
        )?;
        Ok(SyncableProvenance { origin, acceptance })
    }
}

/// Files know their hash at write time, containers derive it from children
fn local_metadata_for(data: Option<&[u8]>) -> LocalItemMetadata {
    match data {
        Some(data) => LocalItemMetadata {
            hash: Some(Hash::of(data)),
            num_descendants: 0,
            size_bytes: data.len() as u64,
        },
        None => LocalItemMetadata::default(),
    }
}
