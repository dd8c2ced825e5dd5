//! Hash/metadata engine
//!
//! Local metadata is invalidated eagerly (the hash of an item and of all its
//! ancestors is cleared when a descendant is added) and recomputed lazily on
//! read. A per-path needs-recompute counter guards against a slow
//! recomputation overwriting the invalidation that happened while it ran.
//! Counters only exist while a recomputation of their path is in flight.

use std::collections::hash_map::Entry;
use std::collections::BTreeMap;

use futures::future::{BoxFuture, FutureExt};

use super::{StoreError, SyncableStore};
use crate::linked_data::Hash;
use crate::metadata::{LocalItemMetadata, StoredItemMetadata};
use crate::path::SyncablePath;

impl SyncableStore {
    /// Hash, size and descendant count of the item at `path`
    pub fn get_local_metadata<'a>(
        &'a self,
        path: &'a SyncablePath,
    ) -> BoxFuture<'a, Result<LocalItemMetadata, StoreError>> {
        async move {
            let recompute = RecomputeGuard::register(self, path);
            loop {
                let observed = recompute.counter();
                let stored = self.backing().get_at_path(path, None).await?;
                if stored.local.hash.is_some() {
                    return Ok(stored.local);
                }

                let computed = self.compute_local_metadata(path, &stored).await?;
                if recompute.counter() != observed {
                    tracing::debug!("{} changed while hashing, retrying", path);
                    continue;
                }
                self.backing()
                    .update_local_metadata_at_path(path, computed.clone())
                    .await?;
                if recompute.counter() == observed {
                    return Ok(computed);
                }
                // invalidated while writing, undo the stale hash and go again
                self.backing()
                    .update_local_metadata_at_path(path, LocalItemMetadata::default())
                    .await?;
            }
        }
        .boxed()
    }

    pub async fn get_hash(&self, path: &SyncablePath) -> Result<Hash, StoreError> {
        self.get_local_metadata(path)
            .await?
            .hash
            .ok_or_else(|| StoreError::Format(format!("no hash computed for {path}")))
    }

    /// Invalidate the local metadata of `path` and every ancestor
    pub async fn mark_needs_recompute_local_metadata(
        &self,
        path: &SyncablePath,
    ) -> Result<(), StoreError> {
        let paths: Vec<SyncablePath> = std::iter::once(path.clone())
            .chain(path.ancestors())
            .collect();
        {
            let mut recomputing = self.inner.recompute.lock();
            for path in &paths {
                if let Some(state) = recomputing.get_mut(path) {
                    state.counter += 1;
                }
            }
        }
        for path in &paths {
            let stored = match self.backing().get_at_path(path, None).await {
                Ok(stored) => stored,
                Err(crate::backing::BackingStoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if stored.local.hash.is_some() {
                self.backing()
                    .update_local_metadata_at_path(
                        path,
                        LocalItemMetadata {
                            hash: None,
                            ..stored.local
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn compute_local_metadata(
        &self,
        path: &SyncablePath,
        stored: &StoredItemMetadata,
    ) -> Result<LocalItemMetadata, StoreError> {
        if !stored.item_type.is_container() {
            let data = self.backing().get_data_at_path(path).await?;
            return Ok(LocalItemMetadata {
                hash: Some(Hash::of(&data)),
                num_descendants: 0,
                size_bytes: data.len() as u64,
            });
        }

        let ids = self.backing().get_ids_in_path(path, None).await?;
        let mut hashes = BTreeMap::new();
        let mut num_descendants = 0;
        let mut size_bytes = 0;
        for id in ids {
            let child = self.get_local_metadata(&path.append(id.clone())).await?;
            let Some(hash) = child.hash else {
                return Err(StoreError::Format(format!("child {id} of {path} has no hash")));
            };
            hashes.insert(id.to_string(), hash);
            num_descendants += child.num_descendants + 1;
            size_bytes += child.size_bytes;
        }
        Ok(LocalItemMetadata {
            hash: Some(Hash::of_encoded(&hashes)?),
            num_descendants,
            size_bytes,
        })
    }
}

/// Needs-recompute counter of a path with recomputations in flight
#[derive(Debug, Default)]
pub(crate) struct RecomputeState {
    counter: u64,
    in_flight: usize,
}

/// Keeps the counter of a path alive while its metadata is recomputed
struct RecomputeGuard<'a> {
    store: &'a SyncableStore,
    path: &'a SyncablePath,
}

impl<'a> RecomputeGuard<'a> {
    fn register(store: &'a SyncableStore, path: &'a SyncablePath) -> Self {
        store
            .inner
            .recompute
            .lock()
            .entry(path.clone())
            .or_default()
            .in_flight += 1;
        Self { store, path }
    }

    fn counter(&self) -> u64 {
        self.store
            .inner
            .recompute
            .lock()
            .get(self.path)
            .map_or(0, |state| state.counter)
    }
}

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        let mut recomputing = self.store.inner.recompute.lock();
        if let Entry::Occupied(mut entry) = recomputing.entry(self.path.clone()) {
            entry.get_mut().in_flight -= 1;
            if entry.get().in_flight == 0 {
                entry.remove();
            }
        }
    }
}
