//! Shared test utilities for store integration tests
#![allow(dead_code)]

use syncable::prelude::*;

pub const STORE_ID: &str = "test-store";

/// Log to the test writer when RUST_LOG is set
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options(backing: &MemoryBackingStore, key: &SecretKey) -> StoreOptions {
    StoreOptions::new(STORE_ID, backing.clone(), InMemoryUserKeys::new(key.clone()))
}

/// Set up a new store on an in-memory backing store, created by a fresh key
pub async fn setup_store() -> (SyncableStore, MemoryBackingStore, SecretKey) {
    init_tracing();
    let backing = MemoryBackingStore::new();
    let key = SecretKey::generate();
    let store = SyncableStore::initialize(options(&backing, &key))
        .await
        .unwrap();
    (store, backing, key)
}

/// Open the same replica as another user
pub async fn open_as(backing: &MemoryBackingStore, key: &SecretKey) -> SyncableStore {
    SyncableStore::open(options(backing, key)).await.unwrap()
}

pub async fn create_folder(parent: &SyncableFolder, name: &str) -> SyncableFolder {
    parent
        .create_folder(
            SyncableId::new_uuid(SyncableItemType::Folder, true),
            CreateMode::local(name),
        )
        .await
        .unwrap()
}

pub async fn create_file(folder: &SyncableFolder, name: &str, content: &str) -> SyncableFile {
    folder
        .create_string_file(
            SyncableId::new_uuid(SyncableItemType::File, true),
            CreateMode::local(name),
            content,
        )
        .await
        .unwrap()
}

/// Resolve a folder through a store, checking every level
pub async fn folder_at(store: &SyncableStore, path: &SyncablePath) -> SyncableFolder {
    store
        .get_at_path(path, Some(SyncableItemType::Folder))
        .await
        .unwrap()
        .into_folder()
        .unwrap()
}
