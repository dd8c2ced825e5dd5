//! Integration tests for the merkle hashes of items

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use syncable::backing::{BackingStoreError, BackingStoreEvent};
use syncable::metadata::{LocalItemMetadata, StoredItemMetadata};
use syncable::prelude::*;
use tokio::sync::{broadcast, oneshot};

/// A listing held open until the test lets it finish
struct Gate {
    path: SyncablePath,
    entered: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-memory backing store that can stall one directory listing
#[derive(Clone, Default)]
struct GatedBacking {
    inner: MemoryBackingStore,
    gate: Arc<Mutex<Option<Gate>>>,
}

impl GatedBacking {
    /// Stall the next listing of `path` after it was read
    ///
    /// Returns a receiver that fires once the listing is stalled and the
    /// sender that lets it return.
    fn stall_next_listing(&self, path: &SyncablePath) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (entered_tx, entered_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.gate.lock() = Some(Gate {
            path: path.clone(),
            entered: entered_tx,
            release: release_rx,
        });
        (entered_rx, release_tx)
    }
}

#[async_trait]
impl BackingStore for GatedBacking {
    async fn exists_at_path(&self, path: &SyncablePath) -> Result<bool, BackingStoreError> {
        self.inner.exists_at_path(path).await
    }

    async fn get_at_path(
        &self,
        path: &SyncablePath,
        expected_type: Option<SyncableItemType>,
    ) -> Result<StoredItemMetadata, BackingStoreError> {
        self.inner.get_at_path(path, expected_type).await
    }

    async fn create_folder_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
    ) -> Result<(), BackingStoreError> {
        self.inner.create_folder_with_path(path, metadata).await
    }

    async fn create_binary_file_with_path(
        &self,
        path: &SyncablePath,
        metadata: StoredItemMetadata,
        data: Vec<u8>,
    ) -> Result<(), BackingStoreError> {
        self.inner
            .create_binary_file_with_path(path, metadata, data)
            .await
    }

    async fn get_data_at_path(&self, path: &SyncablePath) -> Result<Vec<u8>, BackingStoreError> {
        self.inner.get_data_at_path(path).await
    }

    async fn update_local_metadata_at_path(
        &self,
        path: &SyncablePath,
        local: LocalItemMetadata,
    ) -> Result<(), BackingStoreError> {
        self.inner.update_local_metadata_at_path(path, local).await
    }

    async fn get_ids_in_path(
        &self,
        path: &SyncablePath,
        type_filter: Option<SyncableItemType>,
    ) -> Result<Vec<SyncableId>, BackingStoreError> {
        let ids = self.inner.get_ids_in_path(path, type_filter).await?;
        let gate = {
            let mut gate = self.gate.lock();
            match gate.as_ref() {
                Some(held) if &held.path == path && type_filter.is_none() => gate.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.await;
        }
        Ok(ids)
    }

    async fn get_metadata_by_id_in_path(
        &self,
        path: &SyncablePath,
        ids: &[SyncableId],
    ) -> Result<BTreeMap<SyncableId, StoredItemMetadata>, BackingStoreError> {
        self.inner.get_metadata_by_id_in_path(path, ids).await
    }

    fn subscribe(&self) -> broadcast::Receiver<BackingStoreEvent> {
        self.inner.subscribe()
    }
}

#[tokio::test]
async fn test_hash_changes_up_the_tree_only() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let a = common::create_folder(&root, "a").await;
    let b = common::create_folder(&root, "b").await;
    common::create_file(&a, "one.txt", "1").await;

    let root_before = root.get_hash().await.unwrap();
    let a_before = a.get_hash().await.unwrap();
    let b_before = b.get_hash().await.unwrap();

    common::create_file(&a, "two.txt", "2").await;

    assert_ne!(root.get_hash().await.unwrap(), root_before);
    assert_ne!(a.get_hash().await.unwrap(), a_before);
    assert_eq!(b.get_hash().await.unwrap(), b_before);
}

#[tokio::test]
async fn test_hash_is_stable() {
    let (store, backing, key) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let docs = common::create_folder(&root, "docs").await;
    let file = common::create_file(&docs, "x.txt", "x").await;

    let first = store.get_hash(&store.root_path()).await.unwrap();
    assert_eq!(store.get_hash(&store.root_path()).await.unwrap(), first);

    // recomputing from scratch gives the same answer
    store
        .mark_needs_recompute_local_metadata(file.path())
        .await
        .unwrap();
    assert_eq!(store.get_hash(&store.root_path()).await.unwrap(), first);

    let reopened = common::open_as(&backing, &key).await;
    assert_eq!(reopened.get_hash(&reopened.root_path()).await.unwrap(), first);
}

#[tokio::test]
async fn test_same_content_different_items() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let one = common::create_file(&root, "same.txt", "same").await;
    let two = common::create_file(&root, "same.txt", "same").await;

    // each payload is sealed with a fresh nonce
    assert_ne!(
        one.get_hash().await.unwrap(),
        two.get_hash().await.unwrap()
    );
}

#[tokio::test]
async fn test_deletion_changes_folder_hash() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "gone.txt", "x").await;

    let before = root.get_hash().await.unwrap();
    store.delete_item(file.path()).await.unwrap();
    // the tombstone is a new delta in the store changes document
    assert_ne!(root.get_hash().await.unwrap(), before);
}

#[tokio::test]
async fn test_local_metadata_tracks_size() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let plain = root
        .create_string_file(
            SyncableId::new_uuid(SyncableItemType::File, false),
            CreateMode::local("plain.txt"),
            "12345",
        )
        .await
        .unwrap();

    let local = plain.get_local_metadata().await.unwrap();
    assert_eq!(local.size_bytes, 5);
    assert_eq!(local.hash, Some(plain.get_hash().await.unwrap()));
}

#[tokio::test]
async fn test_write_during_hashing_is_not_lost() {
    common::init_tracing();
    let backing = GatedBacking::default();
    let key = SecretKey::generate();
    let options = |backing: GatedBacking| {
        StoreOptions::new(common::STORE_ID, backing, InMemoryUserKeys::new(key.clone()))
    };
    let store = SyncableStore::initialize(options(backing.clone()))
        .await
        .unwrap();
    let root = store.root().await.unwrap();
    common::create_file(&root, "one.txt", "1").await;

    // hash the root from a listing that misses the next write
    let (stalled, release) = backing.stall_next_listing(&store.root_path());
    let hashing = tokio::spawn({
        let store = store.clone();
        async move {
            let root = store.root_path();
            store.get_hash(&root).await
        }
    });
    stalled.await.unwrap();
    let two = common::create_file(&root, "two.txt", "2").await;
    release.send(()).unwrap();
    let hash = hashing.await.unwrap().unwrap();

    // a store that never raced agrees, so the stale hash was not kept
    let fresh = SyncableStore::open(options(backing.clone())).await.unwrap();
    fresh
        .mark_needs_recompute_local_metadata(two.path())
        .await
        .unwrap();
    assert_eq!(fresh.get_hash(&fresh.root_path()).await.unwrap(), hash);
    assert_eq!(store.get_hash(&store.root_path()).await.unwrap(), hash);
    assert_eq!(root.get_local_metadata().await.unwrap().hash, Some(hash));
}
