//! Deletion tombstones
//!
//! Deletion is logical: a folder's `store-changes` document records which
//! paths under it were deleted, and reads consult it. Nothing is physically
//! removed from the backing store.

mod document;

use async_trait::async_trait;

use crate::crdt::{DocumentError, DocumentFile, DocumentKind};
use crate::crypto::CryptoKeySetId;
use crate::path::SyncablePath;
use crate::store::SyncableStore;

pub use document::{
    DeletionRights, SignedStoreChange, StoreChange, StoreChangeExtras, StoreChangeKind,
    StoreChangesDocument, StoreChangesError,
};

/// Validity rules for a folder's store changes document
#[derive(Debug, Clone)]
pub struct StoreChangesKind {
    folder: SyncablePath,
}

impl StoreChangesKind {
    pub fn new(folder: SyncablePath) -> Self {
        Self { folder }
    }
}

#[async_trait]
impl DocumentKind for StoreChangesKind {
    type Document = StoreChangesDocument;

    fn name(&self) -> &'static str {
        "store-changes"
    }

    fn load_document(&self, snapshot: &[u8]) -> Result<StoreChangesDocument, DocumentError> {
        StoreChangesDocument::from_snapshot(snapshot)
    }

    /// Snapshots come from the folder's creator or the store's creator
    async fn is_snapshot_valid(&self, store: &SyncableStore, snapshot: &DocumentFile) -> bool {
        let Some(signer) = snapshot.verified_signer() else {
            return false;
        };
        let Ok(document) = StoreChangesDocument::from_snapshot(&snapshot.data) else {
            return false;
        };
        if document.folder_path() != &self.folder {
            return false;
        }
        let folder_creator = store.folder_creator(&self.folder).await.ok();
        let store_creator = store.creator().await.ok();
        folder_creator == Some(signer) || store_creator == Some(signer)
    }

    async fn is_delta_valid_for_document(
        &self,
        store: &SyncableStore,
        document: &StoreChangesDocument,
        delta: &DocumentFile,
    ) -> bool {
        let Some(signer) = delta.verified_signer() else {
            return false;
        };
        let access = match store.access_control_document(&self.folder).await {
            Ok(access) => access,
            Err(e) => {
                tracing::debug!("no access control for {}: {}", self.folder, e);
                return false;
            }
        };
        let signer_id = CryptoKeySetId::for_public_key(&signer);
        let (role, folder_creator) = access
            .with(|access| (access.role_of(&signer_id), access.creator()))
            .await;
        let store_creator = store.creator().await.ok();
        let rights = DeletionRights {
            delete_items: role.is_some_and(|role| role.is_admin_or_above()),
            delete_folders: signer == folder_creator || store_creator == Some(signer),
        };

        match document.validate_delta(&signer, rights, &delta.data) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("rejecting store changes delta {}: {}", delta.path, e);
                false
            }
        }
    }
}
