//! Integration tests for stores persisted on disk

mod common;

use std::path::Path;

use syncable::prelude::*;

async fn disk_options(dir: &Path, key: &SecretKey) -> StoreOptions {
    let backing = FsBackingStore::new(dir.join("items")).await.unwrap();
    StoreOptions::new(common::STORE_ID, backing, InMemoryUserKeys::new(key.clone()))
}

#[tokio::test]
async fn test_store_survives_reopen() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let key = SecretKey::generate();

    let (file_path, hash) = {
        let store = SyncableStore::initialize(disk_options(dir.path(), &key).await)
            .await
            .unwrap();
        let root = store.root().await.unwrap();
        let folder = common::create_folder(&root, "photos").await;
        let file = common::create_file(&folder, "caption.txt", "sunset").await;
        let hash = store.get_hash(&store.root_path()).await.unwrap();
        (file.path().clone(), hash)
    };

    let store = SyncableStore::open(disk_options(dir.path(), &key).await)
        .await
        .unwrap();
    assert_eq!(store.get_hash(&store.root_path()).await.unwrap(), hash);

    let file = store
        .get_at_path(&file_path, Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(file.get_string().await.unwrap(), "sunset");
    assert_eq!(file.name().await.unwrap(), "caption.txt");

    let entries = store.root().await.unwrap().ls().await.unwrap();
    assert!(entries
        .iter()
        .any(|entry| entry.relative_name == "photos/caption.txt"));
}

#[tokio::test]
async fn test_initialize_twice_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let key = SecretKey::generate();
    SyncableStore::initialize(disk_options(dir.path(), &key).await)
        .await
        .unwrap();

    let err = SyncableStore::initialize(disk_options(dir.path(), &key).await)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Conflict);
}

#[tokio::test]
async fn test_expected_creator_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let key = SecretKey::generate();
    SyncableStore::initialize(disk_options(dir.path(), &key).await)
        .await
        .unwrap();

    let impostor = SecretKey::generate().public();
    let err = SyncableStore::open(
        disk_options(dir.path(), &key)
            .await
            .with_expected_creator(impostor),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Untrusted);

    let store = SyncableStore::open(
        disk_options(dir.path(), &key)
            .await
            .with_expected_creator(key.public()),
    )
    .await
    .unwrap();
    assert!(store.root().await.is_ok());
}

#[tokio::test]
async fn test_sync_memory_to_disk() {
    let (memory, _, key) = common::setup_store().await;
    let root = memory.root().await.unwrap();
    let file = common::create_file(&root, "todo.txt", "buy milk").await;

    let dir = tempfile::tempdir().unwrap();
    let disk = SyncableStore::open(disk_options(dir.path(), &key).await)
        .await
        .unwrap();
    SyncDriver::new(disk.clone(), LocalRemote::new(memory.clone()))
        .with_strategy(PullStrategy::Batch)
        .sync()
        .await
        .unwrap();

    // read back through a fresh store so nothing comes from caches
    let reopened = SyncableStore::open(disk_options(dir.path(), &key).await)
        .await
        .unwrap();
    assert_eq!(
        reopened.get_hash(&reopened.root_path()).await.unwrap(),
        memory.get_hash(&memory.root_path()).await.unwrap()
    );
    let read = reopened
        .get_at_path(file.path(), Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(read.get_string().await.unwrap(), "buy milk");
}
