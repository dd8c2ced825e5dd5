use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};

use super::messages::{
    BatchContents, BatchItem, PullOutcome, PullPayload, PullRequest, PullResponse, PullStrategy,
};
use crate::path::SyncablePath;
use crate::store::{StoreError, SyncableStore};

impl SyncableStore {
    /// Answer a replica's pull for one item
    ///
    /// Serves encoded data without checking provenance; the puller checks
    /// everything it receives on its own.
    pub async fn pull(&self, request: &PullRequest) -> Result<PullResponse, StoreError> {
        let path = &request.path;
        if path.storage_root_id() != self.storage_root_id() {
            return Err(StoreError::NotFound(path.clone()));
        }
        let stored = self.backing().get_at_path(path, None).await?;
        let hash = self.get_hash(path).await?;
        if request.hash == Some(hash) {
            return Ok(PullResponse::new(stored.item_type, PullOutcome::InSync));
        }

        let mut hashes_by_id = BTreeMap::new();
        let mut batch_contents = None;
        let mut data = None;
        if stored.item_type.is_container() {
            for id in self.backing().get_ids_in_path(path, None).await? {
                let child_hash = self.get_hash(&path.append(id.clone())).await?;
                hashes_by_id.insert(id, child_hash);
            }
            if request.strategy == PullStrategy::Batch {
                batch_contents = Some(self.batch_contents(path).await?);
            }
        } else {
            data = Some(self.backing().get_data_at_path(path).await?);
        }
        tracing::debug!(
            "{} out of sync ({} children, batch: {})",
            path,
            hashes_by_id.len(),
            batch_contents.as_ref().map_or(0, BatchContents::len)
        );

        Ok(PullResponse::new(
            stored.item_type,
            PullOutcome::OutOfSync(PullPayload {
                metadata: stored.item,
                hashes_by_id,
                batch_contents,
                data,
            }),
        ))
    }

    /// Every descendant of a container, with metadata and encoded payloads
    ///
    /// Best effort: a descendant that cannot be read is left out along with
    /// its subtree.
    pub async fn batch_contents(&self, path: &SyncablePath) -> Result<BatchContents, StoreError> {
        let mut contents = BatchContents::default();
        self.collect_batch(path, &mut contents).await?;
        Ok(contents)
    }

    fn collect_batch<'a>(
        &'a self,
        path: &'a SyncablePath,
        contents: &'a mut BatchContents,
    ) -> BoxFuture<'a, Result<(), StoreError>> {
        async move {
            for id in self.backing().get_ids_in_path(path, None).await? {
                let child = path.append(id);
                let stored = match self.backing().get_at_path(&child, None).await {
                    Ok(stored) => stored,
                    Err(e) => {
                        tracing::warn!("leaving {} out of batch: {}", child, e);
                        continue;
                    }
                };
                let data = if stored.item_type.is_container() {
                    None
                } else {
                    match self.backing().get_data_at_path(&child).await {
                        Ok(data) => Some(data),
                        Err(e) => {
                            tracing::warn!("leaving {} out of batch: {}", child, e);
                            continue;
                        }
                    }
                };
                contents.push(
                    stored.item_type,
                    BatchItem {
                        path: child.clone(),
                        metadata: stored.item,
                        data,
                    },
                );
                if stored.item_type.is_container() {
                    self.collect_batch(&child, contents).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }
}
