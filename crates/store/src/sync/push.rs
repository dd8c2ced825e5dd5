use super::messages::{BatchContents, BatchItem, PushRequest, PushResponse};
use crate::store::{CreateMode, StoreError, SyncableStore};

impl SyncableStore {
    /// Replicate an item a replica sent, plus its inlined subtree
    ///
    /// The item is stored as sent and checked when it is first read. Its
    /// parent must already exist and be trusted here. An item that already
    /// exists, or that is tombstoned here, is left alone.
    pub async fn push(&self, request: PushRequest) -> Result<PushResponse, StoreError> {
        let path = request.path;
        if path.storage_root_id() != self.storage_root_id() {
            return Ok(PushResponse::NotFound);
        }
        if request.item_type != path.item_type() {
            return Err(StoreError::Format(format!(
                "pushed {} to a {} path {}",
                request.item_type,
                path.item_type(),
                path
            )));
        }

        let created = match path.parent() {
            None => match self.create_root_via_sync(request.metadata).await {
                Ok(()) => true,
                Err(StoreError::Conflict(_)) => false,
                Err(e) => return Err(e),
            },
            Some(parent) => {
                match self.resolve(&parent, None, false).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound(missing)) => {
                        tracing::debug!("cannot push {}: {} is missing", path, missing);
                        return Ok(PushResponse::NotFound);
                    }
                    Err(e) => return Err(e),
                }
                let Some(id) = path.last_id().cloned() else {
                    return Ok(PushResponse::NotFound);
                };
                match self
                    .create_item(
                        &parent,
                        id,
                        CreateMode::ViaSync {
                            metadata: request.metadata,
                        },
                        request.data,
                    )
                    .await
                {
                    Ok(_) => true,
                    Err(StoreError::Conflict(_)) => false,
                    Err(StoreError::Deleted(_)) => {
                        tracing::debug!("not replicating deleted {}", path);
                        return Ok(PushResponse::Ok);
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        if created {
            tracing::debug!("pushed {}", path);
        }

        if let Some(contents) = request.batch_contents {
            self.push_batch_contents(contents).await?;
        }
        Ok(PushResponse::Ok)
    }

    /// Replicate an inlined subtree, parents before children
    ///
    /// Items that already exist, are tombstoned, or whose parent is missing
    /// are skipped.
    /// Returns how many items were created.
    pub async fn push_batch_contents(&self, contents: BatchContents) -> Result<usize, StoreError> {
        let BatchContents {
            mut folders,
            mut bundles,
            mut files,
        } = contents;
        folders.sort_by_key(|item| item.path.ids().len());
        bundles.sort_by_key(|item| item.path.ids().len());
        files.sort_by_key(|item| item.path.ids().len());

        let mut created = 0;
        for item in folders.into_iter().chain(bundles).chain(files) {
            if self.push_batch_item(item).await? {
                created += 1;
            }
        }
        tracing::debug!("created {} items from batch", created);
        Ok(created)
    }

    async fn push_batch_item(&self, item: BatchItem) -> Result<bool, StoreError> {
        let (Some(parent), Some(id)) = (item.path.parent(), item.path.last_id().cloned()) else {
            return Ok(false);
        };
        let mode = CreateMode::ViaSync {
            metadata: item.metadata,
        };
        match self.create_item(&parent, id, mode, item.data).await {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict(_)) => Ok(false),
            Err(StoreError::Deleted(deleted)) => {
                tracing::debug!("skipping {}: {} is deleted", item.path, deleted);
                Ok(false)
            }
            Err(StoreError::NotFound(missing)) => {
                tracing::debug!("skipping {}: {} is missing", item.path, missing);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
