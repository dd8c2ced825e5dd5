//! Integration tests for tombstones and who may write them

mod common;

use syncable::prelude::*;

#[tokio::test]
async fn test_delete_file_hides_it() {
    let (store, backing, key) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "old.txt", "bye").await;
    let id = file.path().last_id().unwrap().clone();

    root.delete(&id).await.unwrap();

    assert!(!root.exists(&id).await.unwrap());
    assert!(root.get_ids(None).await.unwrap().is_empty());
    assert!(root.ls().await.unwrap().is_empty());
    let result = root.get(&id, None).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Deleted);

    // the item itself is kept, only tombstoned
    assert!(backing.exists_at_path(file.path()).await.unwrap());

    // and the tombstone is replicated state, not local state
    let reopened = common::open_as(&backing, &key).await;
    assert!(reopened.is_deleted_path(file.path()).await.unwrap());
}

#[tokio::test]
async fn test_deleted_folder_hides_its_contents() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let folder = common::create_folder(&root, "trash").await;
    let file = common::create_file(&folder, "inside.txt", "x").await;

    store.delete_item(folder.path()).await.unwrap();

    let result = store.get_at_path(file.path(), None).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Deleted);
}

#[tokio::test]
async fn test_delete_twice_fails() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "once.txt", "x").await;

    store.delete_item(file.path()).await.unwrap();
    let result = store.delete_item(file.path()).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Deleted);
}

#[tokio::test]
async fn test_system_items_cannot_be_deleted() {
    let (store, _, _) = common::setup_store().await;
    let root = store.root_path();

    let result = store.delete_item(&root).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);

    let access = root.append(SyncableId::access_control());
    let result = store.delete_item(&access).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);
}

#[tokio::test]
async fn test_editor_cannot_delete_files() {
    let (store, backing, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "keep.txt", "x").await;

    let editor = SecretKey::generate();
    root.grant_access(editor.public(), Role::Editor).await.unwrap();
    let editor_store = common::open_as(&backing, &editor).await;

    let result = editor_store.delete_item(file.path()).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);
    assert!(!store.is_deleted_path(file.path()).await.unwrap());
}

#[tokio::test]
async fn test_admin_deletes_files_but_not_folders() {
    let (store, backing, _) = common::setup_store().await;
    let root = store.root().await.unwrap();
    let file = common::create_file(&root, "junk.txt", "x").await;
    let folder = common::create_folder(&root, "precious").await;

    let admin = SecretKey::generate();
    root.grant_access(admin.public(), Role::Admin).await.unwrap();
    let admin_store = common::open_as(&backing, &admin).await;

    admin_store.delete_item(file.path()).await.unwrap();
    let result = admin_store.delete_item(folder.path()).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);

    // the creator sees the admin's tombstone
    let root_again = store.root().await.unwrap();
    let id = file.path().last_id().unwrap().clone();
    assert!(!root_again.exists(&id).await.unwrap());
    assert!(root_again
        .exists(folder.path().last_id().unwrap())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_folder_creator_deletes_child_folders() {
    let (store, backing, _) = common::setup_store().await;
    let root = store.root().await.unwrap();

    let k2 = SecretKey::generate();
    root.grant_access(k2.public(), Role::Editor).await.unwrap();
    let k2_store = common::open_as(&backing, &k2).await;
    let k2_root = k2_store.root().await.unwrap();
    let project = common::create_folder(&k2_root, "project").await;
    let draft = common::create_folder(&project, "draft").await;

    // K2 created "project", so may delete folders in it
    k2_store.delete_item(draft.path()).await.unwrap();
    // but not folders in the root, which K1 created
    let result = k2_store.delete_item(project.path()).await;
    assert_eq!(result.unwrap_err().code(), ErrorCode::Untrusted);

    // the store creator may delete anywhere
    store.delete_item(project.path()).await.unwrap();
}
