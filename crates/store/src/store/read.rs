use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::item::LsEntry;
use super::{StoreError, SyncableStore};
use crate::access::Role;
use crate::metadata::StoredItemMetadata;
use crate::path::SyncablePath;

impl SyncableStore {
    /// Plain name of an item; encrypted names need read access
    pub(crate) async fn item_name(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<String, StoreError> {
        let encrypted = path.last_id().is_some_and(|id| id.is_encrypted());
        if !encrypted {
            return Ok(stored.item.name.clone());
        }
        self.require_role(path, Role::has_read_access, "read")
            .await?;
        self.folder_operations(&path.owning_folder())
            .decrypt_name(&stored.item.name)
            .await
    }

    /// Decoded payload of a file
    pub(crate) async fn read_file(&self, path: &SyncablePath) -> Result<Vec<u8>, StoreError> {
        self.require_role(path, Role::has_read_access, "read")
            .await?;
        let encrypted = path.last_id().is_some_and(|id| id.is_encrypted());
        if !encrypted {
            return Ok(self.backing().get_data_at_path(path).await?);
        }

        let key = self.cache_key(path);
        if let Some(data) = self.caches().decoded(&key) {
            return Ok(data.as_ref().clone());
        }
        let encoded = self.backing().get_data_at_path(path).await?;
        let data = self
            .folder_operations(&path.owning_folder())
            .decrypt_payload(&encoded)
            .await?;
        self.caches().insert_decoded(key, Arc::new(data.clone()));
        Ok(data)
    }

    pub(crate) fn list_into<'a>(
        &'a self,
        path: &'a SyncablePath,
        prefix: String,
        depth: usize,
        out: &'a mut Vec<LsEntry>,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            let ids = self.backing().get_ids_in_path(path, None).await?;
            for id in ids {
                if id.is_reserved() {
                    continue;
                }
                let child = path.append(id.clone());
                if self.is_deleted_path(&child).await? {
                    continue;
                }
                let stored = self.backing().get_at_path(&child, None).await?;
                if let Err(e) = self.check_trusted(&child, &stored).await {
                    tracing::debug!("not listing {}: {}", child, e);
                    continue;
                }

                let name = self
                    .item_name(&child, &stored)
                    .await
                    .unwrap_or_else(|_| format!("<{id}>"));
                let relative_name = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                let size_bytes = self.get_local_metadata(&child).await?.size_bytes;
                out.push(LsEntry {
                    path: child.clone(),
                    item_type: stored.item_type,
                    name,
                    relative_name: relative_name.clone(),
                    depth,
                    size_bytes,
                });
                if stored.item_type.is_container() {
                    self.list_into(&child, relative_name, depth + 1, out)
                        .await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}
