//! Integration tests for creating, reading and listing items

mod common;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use syncable::prelude::*;

#[tokio::test]
async fn test_plain_file_roundtrip() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();

    let id = SyncableId::new_uuid(SyncableItemType::File, false);
    let file = root
        .create_string_file(id.clone(), CreateMode::local("hello.txt"), "hello world")
        .await
        .unwrap();

    assert_eq!(file.get_string().await.unwrap(), "hello world");
    assert_eq!(file.name().await.unwrap(), "hello.txt");
    // plain items are stored as written
    assert_eq!(file.get_metadata().await.unwrap().item.name, "hello.txt");
    assert_eq!(file.get_encoded_data().await.unwrap(), b"hello world");

    let again = root.get(&id, Some(SyncableItemType::File)).await.unwrap();
    assert_eq!(again.into_file().unwrap().get_string().await.unwrap(), "hello world");
}

#[tokio::test]
async fn test_encrypted_file_roundtrip() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();

    let file = common::create_file(&root, "secret.txt", "attack at dawn").await;

    assert_eq!(file.get_string().await.unwrap(), "attack at dawn");
    assert_eq!(file.name().await.unwrap(), "secret.txt");
    assert_ne!(file.get_metadata().await.unwrap().item.name, "secret.txt");
    assert_ne!(file.get_encoded_data().await.unwrap(), b"attack at dawn");
}

#[tokio::test]
async fn test_encrypted_file_readable_from_fresh_store() {
    let (store, backing, key) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let folder = common::create_folder(&root, "docs").await;
    let file = common::create_file(&folder, "notes.md", "# notes").await;

    let reopened = common::open_as(&backing, &key).await;
    let read = reopened
        .get_at_path(file.path(), Some(SyncableItemType::File))
        .await
        .unwrap()
        .into_file()
        .unwrap();
    assert_eq!(read.get_string().await.unwrap(), "# notes");
    assert_eq!(read.name().await.unwrap(), "notes.md");
}

#[tokio::test]
async fn test_json_file() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        size: u32,
    }

    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let settings = Settings {
        theme: "dark".to_string(),
        size: 12,
    };
    let file = root
        .create_json_file(
            SyncableId::new_uuid(SyncableItemType::File, true),
            CreateMode::local("settings.json"),
            &settings,
        )
        .await
        .unwrap();

    assert_eq!(file.get_json::<Settings>().await.unwrap(), settings);
    let raw = file.get_string().await.unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
}

#[tokio::test]
async fn test_create_existing_id_conflicts() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let id = SyncableId::new_uuid(SyncableItemType::File, false);
    root.create_string_file(id.clone(), CreateMode::local("a"), "a")
        .await
        .unwrap();

    let result = root
        .create_string_file(id, CreateMode::local("b"), "b")
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Conflict);
}

#[tokio::test]
async fn test_get_with_wrong_type() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "a.txt", "a").await;
    let id = file.path().last_id().unwrap().clone();

    let result = root.get(&id, Some(SyncableItemType::Folder)).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::WrongType);

    let missing = SyncableId::new_uuid(SyncableItemType::File, true);
    let result = root.get(&missing, None).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_reserved_and_mistyped_ids_rejected() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();

    let result = root
        .create_bundle(SyncableId::access_control(), CreateMode::local("fake"))
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::FormatError);

    let result = root
        .create_string_file(
            SyncableId::new_uuid(SyncableItemType::Bundle, false),
            CreateMode::local("not a file"),
            "x",
        )
        .await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::FormatError);
}

#[tokio::test]
async fn test_bundle_holds_files() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let bundle = root
        .create_bundle(
            SyncableId::new_uuid(SyncableItemType::Bundle, true),
            CreateMode::local("photos"),
        )
        .await
        .unwrap();
    let file = bundle
        .create_binary_file(
            SyncableId::new_uuid(SyncableItemType::File, true),
            CreateMode::local("cat.jpg"),
            vec![0xff, 0xd8, 0xff],
        )
        .await
        .unwrap();

    assert_eq!(file.get_binary().await.unwrap(), vec![0xff, 0xd8, 0xff]);
    assert_eq!(bundle.get_ids(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ls_lists_nested_names() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let docs = common::create_folder(&root, "docs").await;
    common::create_file(&docs, "a.txt", "a").await;
    common::create_file(&root, "top.txt", "top").await;

    let entries = root.ls().await.unwrap();
    let names: BTreeSet<_> = entries
        .iter()
        .map(|entry| (entry.relative_name.clone(), entry.depth))
        .collect();
    let expected: BTreeSet<_> = [
        ("docs".to_string(), 0),
        ("docs/a.txt".to_string(), 1),
        ("top.txt".to_string(), 0),
    ]
    .into_iter()
    .collect();
    // folder documents are never listed
    assert_eq!(names, expected);

    let found = root.find("docs/*.txt").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "a.txt");
    assert_eq!(found[0].item_type, SyncableItemType::File);

    let formatted = docs.ls_formatted(&|entry| entry.default_format()).await.unwrap();
    assert_eq!(formatted, "a.txt");
}

#[tokio::test]
async fn test_deterministic_ids_are_stable() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();

    let first = root
        .deterministic_id(SyncableItemType::File, true, b"readme.md")
        .await
        .unwrap();
    let second = root
        .deterministic_id(SyncableItemType::File, true, b"readme.md")
        .await
        .unwrap();
    let plain = root
        .deterministic_id(SyncableItemType::File, false, b"readme.md")
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_ne!(first, plain);
    assert!(first.is_encrypted());
    assert!(!plain.is_encrypted());

    // a second folder salts with its own keys
    let other = common::create_folder(&root, "other").await;
    let elsewhere = other
        .deterministic_id(SyncableItemType::File, true, b"readme.md")
        .await
        .unwrap();
    assert_ne!(first, elsewhere);
}
