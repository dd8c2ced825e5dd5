use super::{is_structural, StoreError, SyncableStore};
use crate::access::Role;
use crate::path::{SyncableId, SyncableItemType, SyncablePath};

impl SyncableStore {
    /// Tombstone an item in its owning folder's store changes document
    ///
    /// Files and bundles need admin or above. Folders can only be deleted by
    /// the creator of the owning folder or of the store. The item stays in
    /// the backing store.
    pub async fn delete_item(&self, path: &SyncablePath) -> Result<(), StoreError> {
        let stored = self.backing().get_at_path(path, None).await?;
        if path.is_root() || is_structural(path) || path.last_id().is_some_and(SyncableId::is_reserved)
        {
            return Err(StoreError::untrusted(path, "system items cannot be deleted"));
        }
        if self.is_deleted_path(path).await? {
            return Err(StoreError::Deleted(path.clone()));
        }

        let folder = path.owning_folder();
        if stored.item_type == SyncableItemType::Folder {
            let signer = self.user_keys().signing_key_set().public_key();
            let folder_creator = self.folder_creator(&folder).await?;
            let store_creator = self.creator().await?;
            if signer != folder_creator && signer != store_creator {
                return Err(StoreError::untrusted(
                    path,
                    "only a creator may delete folders",
                ));
            }
        } else {
            self.require_role(path, Role::is_admin_or_above, "delete")
                .await?;
        }

        let changes = self
            .store_changes_document(&folder)
            .await?
            .ok_or_else(|| StoreError::NotFound(folder.append(SyncableId::store_changes())))?;
        let keys = self.user_keys().clone();
        changes
            .update(|changes| changes.delete(keys.as_ref(), vec![path.clone()]))
            .await?;
        changes.save().await?;
        tracing::info!("deleted {}", path);
        Ok(())
    }
}
